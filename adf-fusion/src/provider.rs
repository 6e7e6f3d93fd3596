//! DataFusion plumbing: a `TableProvider` per bound scan and the
//! single-partition `ExecutionPlan` that drives the pull-based iterator.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::catalog::Session;
use datafusion::common::{DataFusionError, Statistics};
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::logical_expr::{Expr, TableType};
use datafusion::physical_expr::EquivalenceProperties;
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::stream::RecordBatchStreamAdapter;
use datafusion::physical_plan::{
    DisplayAs, DisplayFormatType, ExecutionPlan, Partitioning, PlanProperties,
};
use futures::StreamExt;

use crate::scan::{ScanBind, ScanStream};

pub(crate) fn df_err(e: adf_core::Error) -> DataFusionError {
    DataFusionError::External(Box::new(e))
}

/// One logical AnnData table, ready to scan.
pub struct AnnDataTable {
    bind: Arc<ScanBind>,
}

impl AnnDataTable {
    pub fn new(bind: ScanBind) -> Self {
        Self {
            bind: Arc::new(bind),
        }
    }

    pub fn bind(&self) -> &Arc<ScanBind> {
        &self.bind
    }
}

impl fmt::Debug for AnnDataTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnDataTable")
            .field("kind", &self.bind.kind)
            .field("files", &self.bind.files)
            .finish()
    }
}

#[async_trait]
impl datafusion::datasource::TableProvider for AnnDataTable {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        self.bind.schema()
    }

    fn table_type(&self) -> TableType {
        TableType::Base
    }

    async fn scan(
        &self,
        _state: &dyn Session,
        projection: Option<&Vec<usize>>,
        _filters: &[Expr],
        _limit: Option<usize>,
    ) -> datafusion::error::Result<Arc<dyn ExecutionPlan>> {
        Ok(Arc::new(AnnDataExec::try_new(
            self.bind.clone(),
            projection.cloned(),
        )?))
    }
}

/// Single-threaded scan: one partition per plan, parallelism comes from
/// running scans concurrently.
pub struct AnnDataExec {
    bind: Arc<ScanBind>,
    projection: Option<Vec<usize>>,
    projected_schema: SchemaRef,
    properties: PlanProperties,
}

impl AnnDataExec {
    pub fn try_new(
        bind: Arc<ScanBind>,
        projection: Option<Vec<usize>>,
    ) -> datafusion::error::Result<Self> {
        let projected_schema = match &projection {
            Some(indices) => Arc::new(bind.schema().project(indices)?),
            None => bind.schema(),
        };
        let properties = PlanProperties::new(
            EquivalenceProperties::new(projected_schema.clone()),
            Partitioning::UnknownPartitioning(1),
            EmissionType::Incremental,
            Boundedness::Bounded,
        );
        Ok(Self {
            bind,
            projection,
            projected_schema,
            properties,
        })
    }
}

impl fmt::Debug for AnnDataExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnnDataExec(kind={:?})", self.bind.kind)
    }
}

impl DisplayAs for AnnDataExec {
    fn fmt_as(&self, _t: DisplayFormatType, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "AnnDataExec: kind={:?}, files={}, projection={:?}",
            self.bind.kind,
            self.bind.files.len(),
            self.projection
        )
    }
}

impl ExecutionPlan for AnnDataExec {
    fn name(&self) -> &str {
        "AnnDataExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn properties(&self) -> &PlanProperties {
        &self.properties
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![]
    }

    fn with_new_children(
        self: Arc<Self>,
        _children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> datafusion::error::Result<Arc<dyn ExecutionPlan>> {
        Ok(self)
    }

    fn execute(
        &self,
        _partition: usize,
        _context: Arc<TaskContext>,
    ) -> datafusion::error::Result<SendableRecordBatchStream> {
        let stream = ScanStream::new(self.bind.clone(), self.projection.clone()).map_err(df_err)?;
        let schema = stream.schema();
        let stream = futures::stream::iter(stream).map(|item| item.map_err(df_err));
        Ok(Box::pin(RecordBatchStreamAdapter::new(schema, stream)))
    }

    fn statistics(&self) -> datafusion::error::Result<Statistics> {
        Ok(Statistics::new_unknown(&self.projected_schema))
    }
}
