//! End-to-end SQL coverage: table functions and the attach surface over
//! files written the way the Python writer lays them out.

use adf_core::{AttachOptions, RemoteOptions};
use arrow_array::{Array, Float64Array, Int64Array, RecordBatch, StringArray};
use datafusion::prelude::SessionContext;
use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use ndarray::{arr1, Array2};
use tempfile::TempDir;

fn vlu(s: &str) -> VarLenUnicode {
    s.parse().unwrap()
}

fn strings(values: &[&str]) -> Vec<VarLenUnicode> {
    values.iter().map(|s| vlu(s)).collect()
}

fn write_index(group: &Group, values: Vec<VarLenUnicode>) {
    group
        .new_dataset_builder()
        .with_data(&values)
        .create("_index")
        .unwrap();
}

fn write_frames(file: &File, n_obs: usize, n_var: usize) {
    let obs = file.create_group("obs").unwrap();
    write_index(&obs, (0..n_obs).map(|i| vlu(&format!("cell{i}"))).collect());
    let var = file.create_group("var").unwrap();
    write_index(&var, (0..n_var).map(|i| vlu(&format!("GENE{i}"))).collect());
}

fn write_csr(
    parent: &Group,
    name: &str,
    shape: (usize, usize),
    data: &[f64],
    indices: &[i64],
    indptr: &[i64],
) {
    let g = parent.create_group(name).unwrap();
    g.new_dataset_builder().with_data(data).create("data").unwrap();
    g.new_dataset_builder()
        .with_data(indices)
        .create("indices")
        .unwrap();
    g.new_dataset_builder()
        .with_data(indptr)
        .create("indptr")
        .unwrap();
    g.new_attr::<VarLenUnicode>()
        .create("encoding-type")
        .unwrap()
        .write_scalar(&vlu("csr_matrix"))
        .unwrap();
    g.new_attr::<i64>()
        .shape(2)
        .create("shape")
        .unwrap()
        .write(&arr1(&[shape.0 as i64, shape.1 as i64]))
        .unwrap();
}

fn ctx() -> SessionContext {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = SessionContext::new();
    adf_fusion::register_all(&ctx, RemoteOptions::default());
    ctx
}

async fn sql(ctx: &SessionContext, query: &str) -> Vec<RecordBatch> {
    ctx.sql(query).await.unwrap().collect().await.unwrap()
}

fn total_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

fn str_column(batches: &[RecordBatch], name: &str) -> Vec<Option<String>> {
    let mut out = Vec::new();
    for batch in batches {
        let col = batch.column_by_name(name).unwrap();
        let col = col.as_any().downcast_ref::<StringArray>().unwrap();
        for i in 0..col.len() {
            out.push((!col.is_null(i)).then(|| col.value(i).to_string()));
        }
    }
    out
}

fn f64_column(batches: &[RecordBatch], name: &str) -> Vec<Option<f64>> {
    let mut out = Vec::new();
    for batch in batches {
        let col = batch.column_by_name(name).unwrap();
        let col = col.as_any().downcast_ref::<Float64Array>().unwrap();
        for i in 0..col.len() {
            out.push((!col.is_null(i)).then(|| col.value(i)));
        }
    }
    out
}

fn i64_column(batches: &[RecordBatch], name: &str) -> Vec<i64> {
    let mut out = Vec::new();
    for batch in batches {
        let col = batch.column_by_name(name).unwrap();
        let col = col.as_any().downcast_ref::<Int64Array>().unwrap();
        out.extend(col.values().iter().copied());
    }
    out
}

#[tokio::test]
async fn open_and_count() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("f.h5ad");
    {
        let file = File::create(&path).unwrap();
        write_frames(&file, 100, 50);
        let x = Array2::from_shape_fn((100, 50), |(r, c)| (r + c) as f64);
        file.new_dataset_builder().with_data(&x).create("X").unwrap();
    }
    let path = path.to_str().unwrap().to_string();

    let ctx = ctx();
    let batches = sql(&ctx, &format!("SELECT count(*) AS n FROM scan_obs('{path}')")).await;
    assert_eq!(i64_column(&batches, "n"), vec![100]);

    let batches = sql(&ctx, &format!("SELECT count(*) AS n FROM scan_var('{path}')")).await;
    assert_eq!(i64_column(&batches, "n"), vec![50]);

    let batches = sql(
        &ctx,
        &format!("SELECT value FROM info('{path}') WHERE property = 'n_obs'"),
    )
    .await;
    assert_eq!(str_column(&batches, "value"), vec![Some("100".to_string())]);
}

// Sparse CSR with a projected column: indptr=[0,2,2,5],
// indices=[0,4,1,2,4], data=[1..5]; column GENE4 reads (2, 0, 5).
#[tokio::test]
async fn sparse_projection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("csr.h5ad");
    {
        let file = File::create(&path).unwrap();
        write_frames(&file, 3, 5);
        write_csr(
            &file,
            "X",
            (3, 5),
            &[1.0, 2.0, 3.0, 4.0, 5.0],
            &[0, 4, 1, 2, 4],
            &[0, 2, 2, 5],
        );
    }
    let path = path.to_str().unwrap().to_string();

    let ctx = ctx();
    let batches = sql(
        &ctx,
        &format!(r#"SELECT obs_idx, "GENE4" FROM scan_x('{path}') ORDER BY obs_idx"#),
    )
    .await;
    assert_eq!(i64_column(&batches, "obs_idx"), vec![0, 1, 2]);
    assert_eq!(
        f64_column(&batches, "GENE4"),
        vec![Some(2.0), Some(0.0), Some(5.0)]
    );
}

#[tokio::test]
async fn categorical_decode() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cat.h5ad");
    {
        let file = File::create(&path).unwrap();
        let obs = file.create_group("obs").unwrap();
        write_index(&obs, strings(&["a", "b", "c", "d"]));
        let ct = obs.create_group("cell_type").unwrap();
        ct.new_dataset_builder()
            .with_data(&[0i8, 2, -1, 1])
            .create("codes")
            .unwrap();
        ct.new_dataset_builder()
            .with_data(&strings(&["T", "B", "NK"]))
            .create("categories")
            .unwrap();
        let var = file.create_group("var").unwrap();
        write_index(&var, strings(&["G1"]));
    }
    let path = path.to_str().unwrap().to_string();

    let ctx = ctx();
    let batches = sql(
        &ctx,
        &format!("SELECT cell_type FROM scan_obs('{path}')"),
    )
    .await;
    assert_eq!(
        str_column(&batches, "cell_type"),
        vec![
            Some("T".to_string()),
            Some("NK".to_string()),
            None,
            Some("B".to_string())
        ]
    );
}

fn write_multi_pair(dir: &TempDir) -> String {
    // A: {_index, cell_type, sample}, B: {_index, cell_type, batch}.
    for (name, extra) in [("A.h5ad", "sample"), ("B.h5ad", "batch")] {
        let file = File::create(dir.path().join(name)).unwrap();
        let obs = file.create_group("obs").unwrap();
        write_index(&obs, (0..10).map(|i| vlu(&format!("c{i}"))).collect());
        obs.new_dataset_builder()
            .with_data(&(0..10).map(|i| vlu(if i % 2 == 0 { "T" } else { "B" })).collect::<Vec<_>>())
            .create("cell_type")
            .unwrap();
        obs.new_dataset_builder()
            .with_data(&(0..10i32).collect::<Vec<_>>())
            .create(extra)
            .unwrap();
        let var = file.create_group("var").unwrap();
        write_index(&var, strings(&["G1", "G2"]));
    }
    dir.path().join("*.h5ad").to_str().unwrap().to_string()
}

#[tokio::test]
async fn multi_file_intersection() {
    let dir = TempDir::new().unwrap();
    let pattern = write_multi_pair(&dir);

    let ctx = ctx();
    let batches = sql(&ctx, &format!("SELECT * FROM scan_obs('{pattern}')")).await;
    assert_eq!(total_rows(&batches), 20);

    let schema = batches[0].schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert!(names.contains(&"_file_name"));
    assert!(names.contains(&"obs_idx"));
    assert!(names.contains(&"cell_type"));
    // Intersection drops the per-file extras.
    assert!(!names.contains(&"sample"));
    assert!(!names.contains(&"batch"));

    let by_file = str_column(&batches, "_file_name");
    assert_eq!(
        by_file.iter().filter(|f| f.as_deref() == Some("A.h5ad")).count(),
        10
    );
    assert_eq!(
        by_file.iter().filter(|f| f.as_deref() == Some("B.h5ad")).count(),
        10
    );
    // Files in lexicographic order, rows contiguous within a file.
    assert_eq!(by_file[0].as_deref(), Some("A.h5ad"));
    assert_eq!(by_file[19].as_deref(), Some("B.h5ad"));
}

#[tokio::test]
async fn multi_file_union_fills_nulls() {
    let dir = TempDir::new().unwrap();
    let pattern = write_multi_pair(&dir);

    let ctx = ctx();
    let batches = sql(
        &ctx,
        &format!(
            "SELECT _file_name, sample, batch FROM scan_obs('{pattern}', 'union') ORDER BY _file_name, obs_idx"
        ),
    )
    .await;
    assert_eq!(total_rows(&batches), 20);

    let file = str_column(&batches, "_file_name");
    let mut sample_nulls = 0;
    let mut batch_nulls = 0;
    for batch in &batches {
        let sample = batch.column_by_name("sample").unwrap();
        let batchc = batch.column_by_name("batch").unwrap();
        sample_nulls += sample.null_count();
        batch_nulls += batchc.null_count();
    }
    // `sample` is NULL exactly on B rows, `batch` on A rows.
    assert_eq!(sample_nulls, 10);
    assert_eq!(batch_nulls, 10);
    assert_eq!(file.iter().filter(|f| f.as_deref() == Some("A.h5ad")).count(), 10);
}

#[tokio::test]
async fn multi_file_x_intersects_genes() {
    let dir = TempDir::new().unwrap();
    {
        let a = File::create(dir.path().join("a.h5ad")).unwrap();
        let obs = a.create_group("obs").unwrap();
        write_index(&obs, strings(&["c1", "c2"]));
        let var = a.create_group("var").unwrap();
        write_index(&var, strings(&["g1", "g2", "g3"]));
        let x = Array2::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as f64 + 1.0);
        a.new_dataset_builder().with_data(&x).create("X").unwrap();

        let b = File::create(dir.path().join("b.h5ad")).unwrap();
        let obs = b.create_group("obs").unwrap();
        write_index(&obs, strings(&["d1"]));
        let var = b.create_group("var").unwrap();
        write_index(&var, strings(&["g3", "g1"]));
        let x = Array2::from_shape_fn((1, 2), |(_, c)| 10.0 + c as f64);
        b.new_dataset_builder().with_data(&x).create("X").unwrap();
    }
    let pattern = dir.path().join("*.h5ad").to_str().unwrap().to_string();

    let ctx = ctx();
    let batches = sql(
        &ctx,
        &format!("SELECT _file_name, obs_idx, g1, g3 FROM scan_x('{pattern}') ORDER BY _file_name, obs_idx"),
    )
    .await;
    assert_eq!(total_rows(&batches), 3);
    // a.h5ad: g1 is column 0 (1.0, 4.0), g3 column 2 (3.0, 6.0);
    // b.h5ad: g1 is column 1 (11.0), g3 column 0 (10.0).
    assert_eq!(
        f64_column(&batches, "g1"),
        vec![Some(1.0), Some(4.0), Some(11.0)]
    );
    assert_eq!(
        f64_column(&batches, "g3"),
        vec![Some(3.0), Some(6.0), Some(10.0)]
    );

    // The schema is the gene intersection; g2 only exists in a.h5ad.
    let err = ctx
        .sql(&format!("SELECT g2 FROM scan_x('{pattern}')"))
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn obsm_and_graph_tables() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aux.h5ad");
    {
        let file = File::create(&path).unwrap();
        write_frames(&file, 3, 2);
        let obsm = file.create_group("obsm").unwrap();
        let pca = Array2::from_shape_fn((3, 2), |(r, c)| (r * 2 + c) as f64);
        obsm.new_dataset_builder()
            .with_data(&pca)
            .create("X_pca")
            .unwrap();
        let obsp = file.create_group("obsp").unwrap();
        write_csr(
            &obsp,
            "connectivities",
            (3, 3),
            &[0.5, 0.25],
            &[1, 0],
            &[0, 1, 2, 2],
        );
    }
    let path = path.to_str().unwrap().to_string();

    let ctx = ctx();
    let batches = sql(
        &ctx,
        &format!("SELECT obs_idx, dim_0, dim_1 FROM scan_obsm('{path}', 'X_pca') ORDER BY obs_idx"),
    )
    .await;
    assert_eq!(f64_column(&batches, "dim_0"), vec![Some(0.0), Some(2.0), Some(4.0)]);
    assert_eq!(f64_column(&batches, "dim_1"), vec![Some(1.0), Some(3.0), Some(5.0)]);

    let batches = sql(
        &ctx,
        &format!("SELECT * FROM scan_obsp('{path}', 'connectivities') ORDER BY row"),
    )
    .await;
    assert_eq!(i64_column(&batches, "row"), vec![0, 1]);
    assert_eq!(i64_column(&batches, "col"), vec![1, 0]);
    assert_eq!(f64_column(&batches, "value"), vec![Some(0.5), Some(0.25)]);
}

#[tokio::test]
async fn layers_follow_x_shape() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("layered.h5ad");
    {
        let file = File::create(&path).unwrap();
        write_frames(&file, 2, 3);
        let x = Array2::from_shape_fn((2, 3), |(r, c)| (r + c) as f64);
        file.new_dataset_builder().with_data(&x).create("X").unwrap();
        let layers = file.create_group("layers").unwrap();
        let counts = Array2::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as i32);
        layers
            .new_dataset_builder()
            .with_data(&counts)
            .create("counts")
            .unwrap();
    }
    let path = path.to_str().unwrap().to_string();

    let ctx = ctx();
    let batches = sql(
        &ctx,
        &format!(r#"SELECT "GENE2" FROM scan_layers('{path}', 'counts') ORDER BY obs_idx"#),
    )
    .await;
    let mut values = Vec::new();
    for batch in &batches {
        let col = batch.column_by_name("GENE2").unwrap();
        let col = col
            .as_any()
            .downcast_ref::<arrow_array::Int32Array>()
            .unwrap();
        values.extend(col.values().iter().copied());
    }
    assert_eq!(values, vec![2, 5]);
}

#[tokio::test]
async fn uns_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uns.h5ad");
    {
        let file = File::create(&path).unwrap();
        write_frames(&file, 2, 2);
        let uns = file.create_group("uns").unwrap();
        uns.new_dataset_builder()
            .with_data(&strings(&["hg38"]))
            .create("genome")
            .unwrap();
        let nested = uns.create_group("neighbors").unwrap();
        nested
            .new_dataset_builder()
            .with_data(&[15i64])
            .create("n_neighbors")
            .unwrap();
    }
    let path = path.to_str().unwrap().to_string();

    let ctx = ctx();
    let batches = sql(
        &ctx,
        &format!("SELECT key, kind FROM scan_uns('{path}') ORDER BY key"),
    )
    .await;
    let keys = str_column(&batches, "key");
    assert_eq!(
        keys,
        vec![
            Some("genome".to_string()),
            Some("neighbors".to_string()),
            Some("neighbors/n_neighbors".to_string())
        ]
    );
    assert_eq!(
        str_column(&batches, "kind"),
        vec![
            Some("array".to_string()),
            Some("group".to_string()),
            Some("array".to_string())
        ]
    );
}

#[tokio::test]
async fn attach_exposes_views_read_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("att.h5ad");
    {
        let file = File::create(&path).unwrap();
        write_frames(&file, 4, 3);
        let x = Array2::from_shape_fn((4, 3), |(r, c)| (r + c) as f64);
        file.new_dataset_builder().with_data(&x).create("X").unwrap();
        let obsm = file.create_group("obsm").unwrap();
        let pca = Array2::from_shape_fn((4, 2), |(r, c)| (r + c) as f64);
        obsm.new_dataset_builder().with_data(&pca).create("X_pca").unwrap();
    }
    let path = path.to_str().unwrap().to_string();

    let ctx = ctx();
    adf_fusion::attach(
        &ctx,
        &path,
        "adata",
        AttachOptions::default(),
        RemoteOptions::default(),
    )
    .await
    .unwrap();

    let batches = sql(&ctx, "SELECT count(*) AS n FROM adata.obs").await;
    assert_eq!(i64_column(&batches, "n"), vec![4]);

    let batches = sql(&ctx, "SELECT count(*) AS n FROM adata.obsm_X_pca").await;
    assert_eq!(i64_column(&batches, "n"), vec![4]);

    let batches = sql(
        &ctx,
        "SELECT value FROM adata._info WHERE property = 'n_var'",
    )
    .await;
    assert_eq!(str_column(&batches, "value"), vec![Some("3".to_string())]);

    // Writes against the attached schema are rejected.
    let err = ctx
        .sql("CREATE TABLE adata.scratch (a INT)")
        .await;
    match err {
        Err(e) => assert!(e.to_string().contains("read-only"), "{e}"),
        Ok(df) => {
            let e = df.collect().await.unwrap_err();
            assert!(e.to_string().contains("read-only"), "{e}");
        }
    }

    adf_fusion::detach(&ctx, "adata").unwrap();
    assert!(ctx.sql("SELECT * FROM adata.obs").await.is_err());
    assert!(adf_fusion::detach(&ctx, "adata").is_err());
}

#[tokio::test]
async fn missing_container_is_invalid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.h5");
    {
        let file = File::create(&path).unwrap();
        file.create_group("stuff").unwrap();
    }
    let path = path.to_str().unwrap().to_string();

    let ctx = ctx();
    let err = adf_fusion::attach(
        &ctx,
        &path,
        "bad",
        AttachOptions::default(),
        RemoteOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, adf_core::Error::InvalidFile(_)));
}
