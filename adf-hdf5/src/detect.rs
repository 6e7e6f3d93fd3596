//! Choice of the `var` columns holding gene names and gene identifiers.
//!
//! Priority: the caller's explicit choice, then well-known aliases, then
//! content sampling scored by regex, then the frame's index column. The
//! result of an auto-detection is announced once so it can be overridden.

use adf_core::{Error, Result};
use arrow_array::{Array, StringArray};
use arrow_schema::DataType;
use lazy_static::lazy_static;
use log::info;
use regex::Regex;

use crate::frame::FrameReader;
use crate::schema::FrameSchema;

pub const GENE_NAME_ALIASES: &[&str] = &[
    "gene_symbols",
    "gene_symbol",
    "gene_names",
    "gene_name",
    "feature_name",
    "feature_names",
    "symbols",
    "symbol",
];

pub const GENE_ID_ALIASES: &[&str] = &[
    "gene_ids",
    "gene_id",
    "ensembl_id",
    "ensembl_ids",
    "feature_id",
    "feature_ids",
];

const SAMPLE_ROWS: usize = 10;

lazy_static! {
    static ref SYMBOL_RE: Regex = Regex::new(r"^[A-Z][A-Z0-9-]{1,12}$").unwrap();
    static ref ENSEMBL_RE: Regex = Regex::new(r"^ENS[A-Z]*G[0-9]+").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct VarColumns {
    pub name_column: Option<String>,
    pub id_column: Option<String>,
}

pub fn detect_var_columns(
    reader: &FrameReader,
    frame: &FrameSchema,
    explicit_name: Option<&str>,
    explicit_id: Option<&str>,
) -> Result<VarColumns> {
    let validate = |col: &str| -> Result<String> {
        frame
            .column(col)
            .map(|c| c.name.clone())
            .ok_or_else(|| Error::SchemaMismatch(format!("var has no column '{col}'")))
    };

    let mut detected = false;
    let name_column = match explicit_name {
        Some(col) => Some(validate(col)?),
        None => {
            detected = true;
            find_alias(frame, GENE_NAME_ALIASES)
                .or_else(|| score_columns(reader, frame, &SYMBOL_RE))
                .or_else(|| frame.index_column.clone())
        }
    };
    let id_column = match explicit_id {
        Some(col) => Some(validate(col)?),
        None => {
            detected = true;
            find_alias(frame, GENE_ID_ALIASES)
                .or_else(|| score_columns(reader, frame, &ENSEMBL_RE))
                .or_else(|| frame.index_column.clone())
        }
    };

    if detected {
        info!(
            "using var column {:?} for gene names and {:?} for gene ids; \
             pass var_name_col / var_id_col to override",
            name_column, id_column
        );
    }

    Ok(VarColumns {
        name_column,
        id_column,
    })
}

fn find_alias(frame: &FrameSchema, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        if let Some(col) = frame
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(alias))
        {
            return Some(col.name.clone());
        }
    }
    None
}

/// Sample the head of every text column and pick the best scorer for the
/// pattern; ties go to the earlier column.
fn score_columns(reader: &FrameReader, frame: &FrameSchema, pattern: &Regex) -> Option<String> {
    let sample = SAMPLE_ROWS.min(frame.n_rows);
    if sample == 0 {
        return None;
    }

    let mut best: Option<(usize, String)> = None;
    for col in &frame.columns {
        if col.dtype != DataType::Utf8 {
            continue;
        }
        let Ok(array) = reader.read_column(col, 0, sample) else {
            continue;
        };
        let Some(strings) = array.as_any().downcast_ref::<StringArray>() else {
            continue;
        };
        let score = (0..strings.len())
            .filter(|&i| !strings.is_null(i) && pattern.is_match(strings.value(i)))
            .count();
        if score > 0 && best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
            best = Some((score, col.name.clone()));
        }
    }
    best.map(|(_, name)| name)
}
