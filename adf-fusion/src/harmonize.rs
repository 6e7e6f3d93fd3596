//! Multi-file schema harmonization: intersection or union of column sets
//! with per-file mappings, and the matching treatment of var-name vectors
//! for X and layers.

use std::collections::{HashMap, HashSet};

use adf_core::{Error, Result, SchemaMode};
use adf_hdf5::FrameSchema;
use arrow_schema::DataType;

/// Sentinel in per-file mappings for "this file has no such column"; the
/// scanner emits NULL for the slice.
pub const ABSENT: i64 = -1;

/// Pairwise, associative type coercion.
pub fn coerce(a: &DataType, b: &DataType) -> Result<DataType> {
    use DataType::*;
    if a == b {
        return Ok(a.clone());
    }
    Ok(match (a, b) {
        (Utf8, _) | (_, Utf8) => Utf8,
        (Int32, Int64) | (Int64, Int32) => Int64,
        (Float32, Float64) | (Float64, Float32) => Float64,
        (Int32, Float32) | (Float32, Int32) => Float32,
        (Int32, Float64) | (Float64, Int32) => Float64,
        (Int64, Float32) | (Float32, Int64) => Float64,
        (Int64, Float64) | (Float64, Int64) => Float64,
        _ => {
            return Err(Error::SchemaMismatch(format!(
                "cannot coerce {a} with {b}"
            )))
        }
    })
}

/// Harmonized frame columns plus, per file, the index of each result
/// column inside that file's frame ([`ABSENT`] when missing).
#[derive(Debug, Clone)]
pub struct HarmonizedColumns {
    pub columns: Vec<(String, DataType)>,
    pub maps: Vec<Vec<i64>>,
}

pub fn harmonize_frames(frames: &[&FrameSchema], mode: SchemaMode) -> Result<HarmonizedColumns> {
    let mut names: Vec<String> = Vec::new();
    let mut types: HashMap<String, DataType> = HashMap::new();

    for (i, frame) in frames.iter().enumerate() {
        match mode {
            SchemaMode::Intersection => {
                if i == 0 {
                    for col in &frame.columns {
                        names.push(col.name.clone());
                        types.insert(col.name.clone(), col.dtype.clone());
                    }
                } else {
                    let present: HashSet<&str> =
                        frame.columns.iter().map(|c| c.name.as_str()).collect();
                    names.retain(|n| present.contains(n.as_str()));
                    for col in &frame.columns {
                        // Only surviving columns need a coercible type.
                        if !names.contains(&col.name) {
                            continue;
                        }
                        if let Some(t) = types.get_mut(&col.name) {
                            *t = coerce(t, &col.dtype)?;
                        }
                    }
                }
            }
            SchemaMode::Union => {
                for col in &frame.columns {
                    match types.get_mut(&col.name) {
                        Some(t) => *t = coerce(t, &col.dtype)?,
                        None => {
                            names.push(col.name.clone());
                            types.insert(col.name.clone(), col.dtype.clone());
                        }
                    }
                }
            }
        }
    }

    if names.is_empty() {
        return Err(Error::SchemaMismatch(
            "no common columns across files".to_string(),
        ));
    }

    let maps = frames
        .iter()
        .map(|frame| {
            names
                .iter()
                .map(|n| {
                    frame
                        .columns
                        .iter()
                        .position(|c| &c.name == n)
                        .map(|p| p as i64)
                        .unwrap_or(ABSENT)
                })
                .collect()
        })
        .collect();

    let columns = names
        .into_iter()
        .map(|n| {
            let t = types.remove(&n).expect("typed above");
            (n, t)
        })
        .collect();

    Ok(HarmonizedColumns { columns, maps })
}

/// Unique display names; later duplicates get a numeric suffix. Applied to
/// var-name vectors before harmonization so mapping is by unique name.
pub fn mangle(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .into_iter()
        .map(|n| {
            let count = seen.entry(n.clone()).or_insert(0);
            let out = if *count > 0 { format!("{n}_{count}") } else { n };
            *count += 1;
            out
        })
        .collect()
}

/// Harmonize per-file var-name vectors into the result's column list.
pub fn harmonize_var_names(per_file: &[Vec<String>], mode: SchemaMode) -> Result<Vec<String>> {
    let mut result: Vec<String> = Vec::new();
    match mode {
        SchemaMode::Intersection => {
            result = per_file[0].clone();
            for names in &per_file[1..] {
                let present: HashSet<&str> = names.iter().map(String::as_str).collect();
                result.retain(|n| present.contains(n.as_str()));
            }
            if result.is_empty() {
                return Err(Error::SchemaMismatch(
                    "var-name intersection across files is empty".to_string(),
                ));
            }
        }
        SchemaMode::Union => {
            let mut seen: HashSet<String> = HashSet::new();
            for names in per_file {
                for n in names {
                    if seen.insert(n.clone()) {
                        result.push(n.clone());
                    }
                }
            }
        }
    }
    Ok(result)
}

/// Map result var names onto one file's (mangled) var-name vector;
/// [`ABSENT`] where the file lacks the name. `wanted` restricts the work
/// to a projection.
pub fn var_map_for_file(result_names: &[String], file_names: &[String]) -> Vec<i64> {
    let index: HashMap<&str, usize> = file_names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.as_str(), i))
        .collect();
    result_names
        .iter()
        .map(|n| index.get(n.as_str()).map(|&i| i as i64).unwrap_or(ABSENT))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use DataType::*;

    #[test]
    fn coercion_table() {
        assert_eq!(coerce(&Int32, &Int32).unwrap(), Int32);
        assert_eq!(coerce(&Int32, &Int64).unwrap(), Int64);
        assert_eq!(coerce(&Int32, &Float32).unwrap(), Float32);
        assert_eq!(coerce(&Int64, &Float32).unwrap(), Float64);
        assert_eq!(coerce(&Float32, &Float64).unwrap(), Float64);
        assert_eq!(coerce(&Utf8, &Int64).unwrap(), Utf8);
        assert_eq!(coerce(&Boolean, &Utf8).unwrap(), Utf8);
        assert!(coerce(&Boolean, &Int32).is_err());
    }

    #[test]
    fn coercion_is_associative_over_common_chains() {
        let chain = [Int32, Float32, Int64];
        let left = coerce(&coerce(&chain[0], &chain[1]).unwrap(), &chain[2]).unwrap();
        let right = coerce(&chain[0], &coerce(&chain[1], &chain[2]).unwrap()).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn var_name_intersection_keeps_first_file_order() {
        let a = vec!["g1".into(), "g2".into(), "g3".into()];
        let b = vec!["g3".into(), "g1".into()];
        let names = harmonize_var_names(&[a, b], SchemaMode::Intersection).unwrap();
        assert_eq!(names, vec!["g1", "g3"]);
    }

    #[test]
    fn var_name_union_appends_new_names() {
        let a = vec!["g1".into(), "g2".into()];
        let b = vec!["g2".into(), "g4".into()];
        let names = harmonize_var_names(&[a, b], SchemaMode::Union).unwrap();
        assert_eq!(names, vec!["g1", "g2", "g4"]);
    }

    #[test]
    fn var_map_marks_missing() {
        let result = vec!["g1".to_string(), "g4".to_string()];
        let file = vec!["g4".to_string(), "g2".to_string()];
        assert_eq!(var_map_for_file(&result, &file), vec![ABSENT, 0]);
    }

    #[test]
    fn mangling_is_stable() {
        let names = mangle(vec!["a".into(), "b".into(), "a".into(), "a".into()]);
        assert_eq!(names, vec!["a", "b", "a_1", "a_2"]);
    }

    fn frame(cols: &[(&str, DataType)]) -> FrameSchema {
        use adf_hdf5::schema::{ColumnSchema, FrameKind};
        use hdf5::types::{IntSize, TypeDescriptor};
        FrameSchema {
            kind: FrameKind::Group,
            n_rows: 10,
            columns: cols
                .iter()
                .map(|(name, dtype)| ColumnSchema {
                    name: name.to_string(),
                    hdf5_name: name.to_string(),
                    dtype: dtype.clone(),
                    hdf5_type: TypeDescriptor::Integer(IntSize::U4),
                    categorical: false,
                })
                .collect(),
            index_column: None,
        }
    }

    #[test]
    fn frame_intersection_maps_positions() {
        let a = frame(&[("_index", Utf8), ("cell_type", Utf8), ("sample", Int32)]);
        let b = frame(&[("cell_type", Utf8), ("_index", Utf8), ("batch", Int64)]);
        let h = harmonize_frames(&[&a, &b], SchemaMode::Intersection).unwrap();
        let names: Vec<&str> = h.columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["_index", "cell_type"]);
        assert_eq!(h.maps[0], vec![0, 1]);
        assert_eq!(h.maps[1], vec![1, 0]);
    }

    #[test]
    fn frame_union_marks_absent_columns() {
        let a = frame(&[("x", Int32)]);
        let b = frame(&[("x", Int64), ("y", Float32)]);
        let h = harmonize_frames(&[&a, &b], SchemaMode::Union).unwrap();
        assert_eq!(
            h.columns,
            vec![("x".to_string(), Int64), ("y".to_string(), Float32)]
        );
        assert_eq!(h.maps[0], vec![0, ABSENT]);
        assert_eq!(h.maps[1], vec![0, 1]);
    }

    #[test]
    fn empty_intersection_is_a_schema_error() {
        let a = frame(&[("only_a", Int32)]);
        let b = frame(&[("only_b", Int32)]);
        let err = harmonize_frames(&[&a, &b], SchemaMode::Intersection).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }
}
