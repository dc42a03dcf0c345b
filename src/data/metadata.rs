//! Clinical sample metadata: typed columns, key derivation, and joining.

use crate::error::{ProteoError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A variable value that can be categorical or continuous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with a string level.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Missing value. Propagates; never silently zero-filled.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }
}

/// Type hint for columns when loading metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
}

/// Per-sample clinical/demographic records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Sample IDs in order.
    sample_ids: Vec<String>,
    /// Column names.
    column_names: Vec<String>,
    /// Data stored as sample_id -> column_name -> Variable.
    data: HashMap<String, HashMap<String, Variable>>,
    /// Type per column.
    column_types: HashMap<String, VariableType>,
    /// Declared admissible levels for fixed-domain categorical columns.
    domains: HashMap<String, Vec<String>>,
}

impl SampleMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self {
            sample_ids: Vec::new(),
            column_names: Vec::new(),
            data: HashMap::new(),
            column_types: HashMap::new(),
            domains: HashMap::new(),
        }
    }

    /// Load metadata from a TSV file.
    ///
    /// First row: header with column names (first column is the sample ID);
    /// subsequent rows: sample ID followed by values. Columns are inferred
    /// continuous if every value parses as a number, otherwise categorical.
    /// Empty cells and `NA` are missing.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| ProteoError::EmptyData("Empty metadata file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(ProteoError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }
        let column_names: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();

        let mut raw_data: Vec<(String, Vec<String>)> = Vec::new();
        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let sample_id = fields[0].to_string();
            if raw_data.iter().any(|(sid, _)| sid == &sample_id) {
                return Err(ProteoError::SampleMismatch(format!(
                    "duplicate sample '{}' in metadata",
                    sample_id
                )));
            }
            let values: Vec<String> = fields[1..].iter().map(|s| s.to_string()).collect();
            raw_data.push((sample_id, values));
        }
        if raw_data.is_empty() {
            return Err(ProteoError::EmptyData("No samples in metadata".to_string()));
        }

        // Infer column types from the values.
        let mut column_types = HashMap::new();
        for (col_idx, col_name) in column_names.iter().enumerate() {
            let all_numeric = raw_data.iter().all(|(_, values)| {
                let v = values.get(col_idx).map(|s| s.trim()).unwrap_or("");
                is_missing_token(v) || v.parse::<f64>().is_ok()
            });
            let var_type = if all_numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            column_types.insert(col_name.clone(), var_type);
        }

        let mut sample_ids = Vec::new();
        let mut data = HashMap::new();
        for (sample_id, values) in raw_data {
            sample_ids.push(sample_id.clone());
            let mut sample_data = HashMap::new();
            for (col_idx, col_name) in column_names.iter().enumerate() {
                let raw = values.get(col_idx).map(|s| s.trim()).unwrap_or("");
                let var = if is_missing_token(raw) {
                    Variable::Missing
                } else {
                    match column_types.get(col_name) {
                        Some(VariableType::Continuous) => match raw.parse::<f64>() {
                            Ok(v) => Variable::Continuous(v),
                            Err(_) => Variable::Missing,
                        },
                        Some(VariableType::Categorical) | None => {
                            Variable::Categorical(raw.to_string())
                        }
                    }
                };
                sample_data.insert(col_name.clone(), var);
            }
            data.insert(sample_id, sample_data);
        }

        Ok(Self {
            sample_ids,
            column_names,
            data,
            column_types,
            domains: HashMap::new(),
        })
    }

    /// Coerce specific columns to a type, re-parsing existing values.
    pub fn with_column_types(mut self, types: HashMap<String, VariableType>) -> Self {
        for (col_name, var_type) in &types {
            self.column_types.insert(col_name.clone(), *var_type);
            for sample_data in self.data.values_mut() {
                if let Some(var) = sample_data.get_mut(col_name) {
                    *var = match (&*var, var_type) {
                        (Variable::Categorical(s), VariableType::Continuous) => s
                            .trim()
                            .parse::<f64>()
                            .map(Variable::Continuous)
                            .unwrap_or(Variable::Missing),
                        (Variable::Continuous(v), VariableType::Categorical) => {
                            Variable::Categorical(format_level(*v))
                        }
                        (other, _) => other.clone(),
                    };
                }
            }
        }
        self
    }

    /// Declare fixed domains for categorical columns.
    ///
    /// Columns are coerced to categorical and every non-missing value must
    /// be one of the declared levels; an out-of-domain value is an error at
    /// declaration time rather than a silently created level.
    pub fn with_categorical_domains(
        mut self,
        domains: HashMap<String, Vec<String>>,
    ) -> Result<Self> {
        for (col_name, levels) in domains {
            if !self.has_column(&col_name) {
                return Err(ProteoError::MissingColumn(col_name));
            }
            self.column_types
                .insert(col_name.clone(), VariableType::Categorical);
            let level_set: HashSet<&String> = levels.iter().collect();
            for sample_data in self.data.values_mut() {
                if let Some(var) = sample_data.get_mut(&col_name) {
                    let coerced = match &*var {
                        Variable::Continuous(v) => Variable::Categorical(format_level(*v)),
                        other => other.clone(),
                    };
                    if let Variable::Categorical(s) = &coerced {
                        if !level_set.contains(s) {
                            return Err(ProteoError::OutOfDomain {
                                column: col_name.clone(),
                                value: s.clone(),
                            });
                        }
                    }
                    *var = coerced;
                }
            }
            self.domains.insert(col_name, levels);
        }
        Ok(self)
    }

    /// Sample IDs in order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples.
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Number of columns (variables).
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Get a variable value for a specific sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(sample_id).and_then(|m| m.get(column))
    }

    /// All values of a column, in sample order.
    pub fn column(&self, column: &str) -> Result<Vec<&Variable>> {
        if !self.has_column(column) {
            return Err(ProteoError::MissingColumn(column.to_string()));
        }
        Ok(self
            .sample_ids
            .iter()
            .map(|sid| {
                self.data
                    .get(sid)
                    .and_then(|m| m.get(column))
                    .unwrap_or(&Variable::Missing)
            })
            .collect())
    }

    /// The type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Levels of a categorical column: the declared domain if one was set,
    /// otherwise the sorted observed levels.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        if let Some(domain) = self.domains.get(column) {
            return Ok(domain.clone());
        }
        let values = self.column(column)?;
        let mut levels: Vec<String> = values
            .iter()
            .filter_map(|v| v.as_categorical().map(String::from))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        levels.sort();
        Ok(levels)
    }

    /// Encode a column as numbers for correlation / model fitting.
    ///
    /// Continuous values pass through; categorical values become their level
    /// index; missing stays `None`.
    pub fn encode_numeric(&self, column: &str) -> Result<Vec<Option<f64>>> {
        let values = self.column(column)?;
        match self.column_type(column) {
            Some(VariableType::Continuous) => {
                Ok(values.iter().map(|v| v.as_continuous()).collect())
            }
            Some(VariableType::Categorical) | None => {
                let levels = self.levels(column)?;
                values
                    .iter()
                    .map(|v| match v {
                        Variable::Missing => Ok(None),
                        Variable::Categorical(s) => levels
                            .iter()
                            .position(|l| l == s)
                            .map(|i| Some(i as f64))
                            .ok_or_else(|| ProteoError::OutOfDomain {
                                column: column.to_string(),
                                value: s.clone(),
                            }),
                        Variable::Continuous(x) => Ok(Some(*x)),
                    })
                    .collect()
            }
        }
    }

    /// Subset to the given samples, erroring on unknown IDs.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let mut new_data = HashMap::new();
        let mut new_sample_ids = Vec::new();
        for sid in sample_ids {
            if let Some(sample_data) = self.data.get(sid) {
                new_data.insert(sid.clone(), sample_data.clone());
                new_sample_ids.push(sid.clone());
            } else {
                return Err(ProteoError::SampleMismatch(format!(
                    "Sample '{}' not found in metadata",
                    sid
                )));
            }
        }
        Ok(Self {
            sample_ids: new_sample_ids,
            column_names: self.column_names.clone(),
            data: new_data,
            column_types: self.column_types.clone(),
            domains: self.domains.clone(),
        })
    }

    /// Align to a matrix's sample order, erroring on unknown IDs.
    pub fn align_to(&self, sample_ids: &[String]) -> Result<Self> {
        self.subset_samples(sample_ids)
    }

    /// Keep only samples present in the given set, in the given order,
    /// counting how many of the requested IDs had no metadata record.
    pub fn intersect_samples(&self, sample_ids: &[String]) -> (Self, usize) {
        let mut new_data = HashMap::new();
        let mut new_sample_ids = Vec::new();
        let mut dropped = 0usize;
        for sid in sample_ids {
            if let Some(sample_data) = self.data.get(sid) {
                new_data.insert(sid.clone(), sample_data.clone());
                new_sample_ids.push(sid.clone());
            } else {
                dropped += 1;
            }
        }
        (
            Self {
                sample_ids: new_sample_ids,
                column_names: self.column_names.clone(),
                data: new_data,
                column_types: self.column_types.clone(),
                domains: self.domains.clone(),
            },
            dropped,
        )
    }

    /// Check if a sample exists.
    pub fn has_sample(&self, sample_id: &str) -> bool {
        self.data.contains_key(sample_id)
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }

    /// Re-key every record to a normalized sample key.
    ///
    /// Each sample ID is stripped of any matching known prefix, then the
    /// first run of digits is extracted as the clot identifier and parsed
    /// numerically (`Clot07` and `TS-7` both become `7`). Records whose ID
    /// yields no digits are removed and counted in the report.
    pub fn derive_sample_keys(&self, prefixes: &[String]) -> Result<(Self, KeyReport)> {
        let keys = derive_keys(&self.sample_ids, prefixes)?;

        let mut new_sample_ids = Vec::new();
        let mut new_data = HashMap::new();
        let mut n_unkeyed = 0usize;
        for (sid, key) in self.sample_ids.iter().zip(keys) {
            match key {
                Some(key) => {
                    if new_data.contains_key(&key) {
                        return Err(ProteoError::SampleMismatch(format!(
                            "derived key '{}' is not unique (sample '{}')",
                            key, sid
                        )));
                    }
                    let record = self.data.get(sid).cloned().unwrap_or_default();
                    new_sample_ids.push(key.clone());
                    new_data.insert(key, record);
                }
                None => n_unkeyed += 1,
            }
        }

        let report = KeyReport {
            n_input: self.sample_ids.len(),
            n_keyed: new_sample_ids.len(),
            n_unkeyed,
        };
        Ok((
            Self {
                sample_ids: new_sample_ids,
                column_names: self.column_names.clone(),
                data: new_data,
                column_types: self.column_types.clone(),
                domains: self.domains.clone(),
            },
            report,
        ))
    }
}

impl Default for SampleMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive normalized sample keys for a list of identifiers.
///
/// Each ID is stripped of the first matching prefix, then its first run of
/// digits is parsed numerically, so `Clot07` and `TS-7` both key to `7`.
/// IDs without digits yield `None`.
pub fn derive_keys(ids: &[String], prefixes: &[String]) -> Result<Vec<Option<String>>> {
    let digits = Regex::new(r"\d+")
        .map_err(|e| ProteoError::InvalidParameter(format!("bad key pattern: {}", e)))?;
    Ok(ids
        .iter()
        .map(|sid| {
            let mut stripped = sid.as_str();
            for prefix in prefixes {
                if let Some(rest) = stripped.strip_prefix(prefix.as_str()) {
                    stripped = rest;
                    break;
                }
            }
            digits
                .find(stripped)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .map(|n| n.to_string())
        })
        .collect())
}

/// Inner-join two metadata tables on their (already derived) sample keys.
///
/// Columns from the right table are appended; right-side columns that share
/// a name with a left column are skipped. Keys present in only one table
/// are dropped and counted, not raised as errors.
pub fn join(left: &SampleMetadata, right: &SampleMetadata) -> (SampleMetadata, JoinReport) {
    let right_keys: HashSet<&String> = right.sample_ids.iter().collect();

    let mut column_names = left.column_names.clone();
    let mut appended_cols = Vec::new();
    for col in &right.column_names {
        if !left.has_column(col) {
            column_names.push(col.clone());
            appended_cols.push(col.clone());
        }
    }

    let mut column_types = left.column_types.clone();
    let mut domains = left.domains.clone();
    for col in &appended_cols {
        if let Some(t) = right.column_types.get(col) {
            column_types.insert(col.clone(), *t);
        }
        if let Some(d) = right.domains.get(col) {
            domains.insert(col.clone(), d.clone());
        }
    }

    let mut sample_ids = Vec::new();
    let mut data = HashMap::new();
    let mut n_matched = 0usize;
    for sid in &left.sample_ids {
        if !right_keys.contains(sid) {
            continue;
        }
        n_matched += 1;
        let mut record = left.data.get(sid).cloned().unwrap_or_default();
        let right_record = right.data.get(sid);
        for col in &appended_cols {
            let value = right_record
                .and_then(|m| m.get(col))
                .cloned()
                .unwrap_or(Variable::Missing);
            record.insert(col.clone(), value);
        }
        sample_ids.push(sid.clone());
        data.insert(sid.clone(), record);
    }

    let report = JoinReport {
        n_left: left.n_samples(),
        n_right: right.n_samples(),
        n_matched,
        n_left_only: left.n_samples() - n_matched,
        n_right_only: right.n_samples() - n_matched,
    };
    (
        SampleMetadata {
            sample_ids,
            column_names,
            data,
            column_types,
            domains,
        },
        report,
    )
}

/// Counts from the sample-key derivation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyReport {
    pub n_input: usize,
    pub n_keyed: usize,
    /// Records whose ID produced no numeric key; removed from the set.
    pub n_unkeyed: usize,
}

impl std::fmt::Display for KeyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Sample key derivation")?;
        writeln!(f, "  Records in:      {}", self.n_input)?;
        writeln!(f, "  Keyed:           {}", self.n_keyed)?;
        writeln!(f, "  No numeric key:  {}", self.n_unkeyed)?;
        Ok(())
    }
}

/// Counts from joining two metadata tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinReport {
    pub n_left: usize,
    pub n_right: usize,
    pub n_matched: usize,
    pub n_left_only: usize,
    pub n_right_only: usize,
}

impl std::fmt::Display for JoinReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Metadata join")?;
        writeln!(f, "  Left records:    {}", self.n_left)?;
        writeln!(f, "  Right records:   {}", self.n_right)?;
        writeln!(f, "  Matched:         {}", self.n_matched)?;
        writeln!(f, "  Left only:       {}", self.n_left_only)?;
        writeln!(f, "  Right only:      {}", self.n_right_only)?;
        Ok(())
    }
}

fn is_missing_token(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("na")
}

/// Render a numeric value as a categorical level without a trailing `.0`.
fn format_level(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_clinical_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tMechanism_Code\tAge\tSex").unwrap();
        writeln!(file, "Clot01\t1\t67\tM").unwrap();
        writeln!(file, "Clot02\t2\t54\tF").unwrap();
        writeln!(file, "Clot03\t1\tNA\tF").unwrap();
        writeln!(file, "Standard\t1\t60\tM").unwrap();
        file.flush().unwrap();
        file
    }

    fn create_demographics_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tHypertension\tStatin").unwrap();
        writeln!(file, "TS-1\tyes\tno").unwrap();
        writeln!(file, "TS-2\tno\tyes").unwrap();
        writeln!(file, "TS-9\tyes\tyes").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_and_infer_types() {
        let file = create_clinical_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        assert_eq!(meta.n_samples(), 4);
        assert_eq!(meta.column_type("Age"), Some(VariableType::Continuous));
        assert_eq!(meta.column_type("Sex"), Some(VariableType::Categorical));
        assert!(meta.get("Clot03", "Age").unwrap().is_missing());
    }

    #[test]
    fn test_duplicate_sample_id_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tAge").unwrap();
        writeln!(file, "Clot01\t67").unwrap();
        writeln!(file, "Clot01\t54").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            SampleMetadata::from_tsv(file.path()),
            Err(ProteoError::SampleMismatch(_))
        ));
    }

    #[test]
    fn test_derive_sample_keys() {
        let file = create_clinical_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        let (keyed, report) = meta
            .derive_sample_keys(&["Clot".to_string()])
            .unwrap();
        assert_eq!(keyed.sample_ids(), &["1", "2", "3"]);
        assert_eq!(report.n_keyed, 3);
        // "Standard" has no digits and is marked for removal.
        assert_eq!(report.n_unkeyed, 1);
    }

    #[test]
    fn test_join_inner_semantics() {
        let clinical = SampleMetadata::from_tsv(create_clinical_tsv().path()).unwrap();
        let demo = SampleMetadata::from_tsv(create_demographics_tsv().path()).unwrap();
        let (clinical, _) = clinical.derive_sample_keys(&["Clot".to_string()]).unwrap();
        let (demo, _) = demo.derive_sample_keys(&["TS-".to_string()]).unwrap();

        let (joined, report) = join(&clinical, &demo);
        // Keys 1 and 2 match; clot 3 and TS-9 are dropped, counted.
        assert_eq!(joined.sample_ids(), &["1", "2"]);
        assert_eq!(report.n_matched, 2);
        assert_eq!(report.n_left_only, 1);
        assert_eq!(report.n_right_only, 1);
        assert_eq!(
            joined.get("1", "Hypertension").unwrap().as_categorical(),
            Some("yes")
        );
        assert_eq!(
            joined.get("2", "Mechanism_Code").unwrap().as_continuous(),
            Some(2.0)
        );
    }

    #[test]
    fn test_categorical_domain_enforced() {
        let file = create_clinical_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        let mut domains = HashMap::new();
        domains.insert(
            "Mechanism_Code".to_string(),
            vec!["1".to_string(), "2".to_string(), "3".to_string()],
        );
        let meta = meta.with_categorical_domains(domains).unwrap();
        assert_eq!(
            meta.column_type("Mechanism_Code"),
            Some(VariableType::Categorical)
        );
        assert_eq!(
            meta.levels("Mechanism_Code").unwrap(),
            vec!["1", "2", "3"]
        );

        // Out-of-domain value is rejected at declaration time.
        let file = create_clinical_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        let mut bad = HashMap::new();
        bad.insert("Mechanism_Code".to_string(), vec!["1".to_string()]);
        assert!(matches!(
            meta.with_categorical_domains(bad),
            Err(ProteoError::OutOfDomain { .. })
        ));
    }

    #[test]
    fn test_encode_numeric() {
        let file = create_clinical_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        let ages = meta.encode_numeric("Age").unwrap();
        assert_eq!(ages[0], Some(67.0));
        assert_eq!(ages[2], None);

        // Categorical: levels sorted → F=0, M=1.
        let sexes = meta.encode_numeric("Sex").unwrap();
        assert_eq!(sexes[0], Some(1.0));
        assert_eq!(sexes[1], Some(0.0));
    }

    #[test]
    fn test_intersect_samples() {
        let file = create_clinical_tsv();
        let meta = SampleMetadata::from_tsv(file.path()).unwrap();
        let (subset, dropped) = meta.intersect_samples(&[
            "Clot01".to_string(),
            "Missing".to_string(),
        ]);
        assert_eq!(subset.n_samples(), 1);
        assert_eq!(dropped, 1);
    }
}
