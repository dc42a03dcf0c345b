//! Integration tests for the full clot proteomics workflow: combined-table
//! split, metadata keying and joining, normalization pipeline, bundle
//! persistence, and the exploratory analyses.

use proteoclot::prelude::*;
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

fn simple_rand(seed: &mut u64) -> f64 {
    *seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
    ((*seed >> 16) & 0x7FFF) as f64 / 32768.0
}

/// Combined table: 18 distinct human proteins (one all-zero, one detected in
/// only two samples), one bovine row, and one duplicated accession.
fn create_combined_tsv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let samples: Vec<String> = (1..=8).map(|i| format!("Clot{:02}", i)).collect();
    // Per-sample scale factors give loess something to remove.
    let scales = [1.0, 1.3, 0.8, 1.1, 0.95, 1.25, 0.9, 1.05];

    write!(file, "Protein.IDs\tProtein.names\tSequence.length\tScore").unwrap();
    for s in &samples {
        write!(file, "\tLFQ.intensity.{}", s).unwrap();
    }
    writeln!(file).unwrap();

    let mut seed = 7u64;
    for i in 0..18 {
        write!(
            file,
            "sp|P{:05}|G{}_HUMAN\tProtein {}\t{}\t{:.1}",
            i,
            i,
            i,
            200 + i * 10,
            50.0 + i as f64
        )
        .unwrap();
        for (j, scale) in scales.iter().enumerate() {
            if i == 16 {
                // Never detected.
                write!(file, "\t").unwrap();
            } else if i == 17 {
                // Detected in two samples only.
                if j < 2 {
                    write!(file, "\t40").unwrap();
                } else {
                    write!(file, "\t").unwrap();
                }
            } else {
                let base = 200.0 * (i + 1) as f64;
                // Protein 15 is both abundant and strongly variable.
                let noise = if i == 15 {
                    0.6 + 0.8 * simple_rand(&mut seed)
                } else {
                    0.9 + 0.2 * simple_rand(&mut seed)
                };
                write!(file, "\t{:.2}", base * scale * noise).unwrap();
            }
        }
        writeln!(file).unwrap();
    }
    // Bovine contaminant.
    write!(file, "tr|Q11111|Q11111_BOVIN\tContaminant\t300\t10.0").unwrap();
    for _ in 0..8 {
        write!(file, "\t100").unwrap();
    }
    writeln!(file).unwrap();
    // Duplicate accession; first occurrence must win.
    write!(file, "sp|P00001|G1_HUMAN\tProtein 1 duplicate\t210\t20.0").unwrap();
    for _ in 0..8 {
        write!(file, "\t1").unwrap();
    }
    writeln!(file).unwrap();

    file.flush().unwrap();
    file
}

/// Clinical metadata keyed `ClotNN`, plus one unkeyable record.
fn create_clinical_tsv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "sample_id\tMechanism_Code\tAge").unwrap();
    for i in 1..=8 {
        let code = if i <= 4 { 1 } else { 2 };
        writeln!(file, "Clot{:02}\t{}\t{}", i, code, 40 + i * 5).unwrap();
    }
    writeln!(file, "Standard\t1\t60").unwrap();
    file.flush().unwrap();
    file
}

/// Demographics keyed `TS-N`, same patients under a different ID scheme.
fn create_demographics_tsv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "sample_id\tHypertension").unwrap();
    for i in 1..=8 {
        let ht = if i % 3 == 0 { "yes" } else { "no" };
        writeln!(file, "TS-{}\t{}", i, ht).unwrap();
    }
    file.flush().unwrap();
    file
}

fn prefixes() -> Vec<String> {
    vec!["Clot".to_string(), "TS-".to_string()]
}

fn prepare_bundle() -> AnalysisBundle {
    let combined = create_combined_tsv();
    let (annotations, matrix, split_report) =
        load_combined_tsv(combined.path(), &CombinedTableConfig::default()).unwrap();
    assert_eq!(split_report.n_input, 20);
    assert_eq!(split_report.n_non_human, 1);
    assert_eq!(split_report.n_duplicates, 1);
    assert_eq!(split_report.n_retained, 18);

    let clinical = SampleMetadata::from_tsv(create_clinical_tsv().path()).unwrap();
    let (clinical, key_report) = clinical.derive_sample_keys(&prefixes()).unwrap();
    assert_eq!(key_report.n_keyed, 8);
    assert_eq!(key_report.n_unkeyed, 1);

    let demo = SampleMetadata::from_tsv(create_demographics_tsv().path()).unwrap();
    let (demo, _) = demo.derive_sample_keys(&prefixes()).unwrap();
    let (metadata, join_report) = join(&clinical, &demo);
    assert_eq!(join_report.n_matched, 8);

    // Re-key the matrix columns the same way.
    let keys = derive_keys(matrix.sample_ids(), &prefixes()).unwrap();
    let keyed: Vec<String> = keys.into_iter().map(|k| k.unwrap()).collect();
    assert_eq!(keyed, (1..=8).map(|i| i.to_string()).collect::<Vec<_>>());
    let matrix = matrix.with_sample_ids(keyed).unwrap();

    let output = run_standard(&matrix, &annotations).unwrap();
    // One all-zero protein dropped, one low-support protein filtered.
    assert_eq!(output.matrix.n_proteins(), 16);
    assert_eq!(output.annotations.len(), 16);

    AnalysisBundle::new(output.matrix, output.annotations, metadata).unwrap()
}

#[test]
fn test_prepare_and_snapshot_roundtrip() {
    let bundle = prepare_bundle();
    let file = NamedTempFile::new().unwrap();
    bundle.save(file.path()).unwrap();
    let loaded = AnalysisBundle::load(file.path()).unwrap();

    assert_eq!(loaded.matrix.protein_ids(), bundle.matrix.protein_ids());
    assert_eq!(loaded.matrix.sample_ids(), bundle.matrix.sample_ids());
    for row in 0..bundle.matrix.n_proteins() {
        for col in 0..bundle.matrix.n_samples() {
            assert_eq!(
                loaded.matrix.get(row, col).to_bits(),
                bundle.matrix.get(row, col).to_bits()
            );
        }
    }
    assert_eq!(
        loaded.metadata.column_names(),
        bundle.metadata.column_names()
    );
}

#[test]
fn test_fixed_domains_declared_at_preparation() {
    let clinical = SampleMetadata::from_tsv(create_clinical_tsv().path()).unwrap();
    let (clinical, _) = clinical.derive_sample_keys(&prefixes()).unwrap();
    let demo = SampleMetadata::from_tsv(create_demographics_tsv().path()).unwrap();
    let (demo, _) = demo.derive_sample_keys(&prefixes()).unwrap();
    let (metadata, _) = join(&clinical, &demo);

    // Same YAML shape the prepare command accepts via --domains.
    let yaml = "Mechanism_Code:\n  - \"1\"\n  - \"2\"\nHypertension:\n  - \"yes\"\n  - \"no\"\n";
    let domains: HashMap<String, Vec<String>> = serde_yaml::from_str(yaml).unwrap();
    let metadata = metadata.with_categorical_domains(domains).unwrap();

    // The numeric code is coerced to a categorical with the declared levels.
    assert_eq!(
        metadata.column_type("Mechanism_Code"),
        Some(VariableType::Categorical)
    );
    assert_eq!(metadata.levels("Mechanism_Code").unwrap(), vec!["1", "2"]);

    // A value outside the declared domain fails at declaration time.
    let clinical = SampleMetadata::from_tsv(create_clinical_tsv().path()).unwrap();
    let mut narrow = HashMap::new();
    narrow.insert("Mechanism_Code".to_string(), vec!["1".to_string()]);
    assert!(matches!(
        clinical.with_categorical_domains(narrow),
        Err(ProteoError::OutOfDomain { .. })
    ));
}

#[test]
fn test_normalization_reduces_sample_offsets() {
    let combined = create_combined_tsv();
    let (annotations, matrix, _) =
        load_combined_tsv(combined.path(), &CombinedTableConfig::default()).unwrap();

    let (matrix, _annotations, _) = drop_empty_proteins(&matrix, &annotations).unwrap();
    let raw_log = log2_offset(&matrix, DEFAULT_LOG_OFFSET).unwrap();
    let normalized =
        normalize_cyclic_loess(&raw_log, &CyclicLoessConfig::default()).unwrap();

    // Per-sample medians should be closer together after normalization.
    let spread = |m: &NormalizedMatrix| {
        let medians: Vec<f64> = (0..m.n_samples())
            .map(|col| {
                let mut v = m.col_dense(col);
                v.sort_by(|a, b| a.partial_cmp(b).unwrap());
                v[v.len() / 2]
            })
            .collect();
        let lo = medians.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = medians.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        hi - lo
    };
    assert!(spread(&normalized) < spread(&raw_log));
}

#[test]
fn test_pca_and_correlation_on_bundle() {
    let bundle = prepare_bundle();
    let pca_result = pca(&bundle.matrix, 5).unwrap();
    assert_eq!(pca_result.sample_ids.len(), 8);
    assert!(pca_result.n_components() <= 5);
    let total: f64 = pca_result.explained.iter().sum();
    assert!(total <= 1.0 + 1e-10);

    let fields = vec![
        "Mechanism_Code".to_string(),
        "Age".to_string(),
        "Hypertension".to_string(),
    ];
    let result =
        correlate_metadata_pcs(&bundle.metadata, &fields, &pca_result, DEFAULT_ALPHA).unwrap();
    assert_eq!(result.components.len(), pca_result.n_components());
    for vi in 0..result.variables.len() {
        for ci in 0..result.components.len() {
            assert!(result.rho[(vi, ci)].is_finite());
            assert!((0.0..=1.0).contains(&result.p_values[(vi, ci)]));
        }
    }
}

#[test]
fn test_umap_on_bundle_is_reproducible() {
    let bundle = prepare_bundle();
    let config = UmapConfig::default().with_n_neighbors(3).with_seed(11);
    let a = umap(&bundle.matrix, &config).unwrap();
    let b = umap(&bundle.matrix, &config).unwrap();
    assert_eq!(a.embedding.len(), 8);
    for (pa, pb) in a.embedding.iter().zip(&b.embedding) {
        assert_eq!(pa[0].to_bits(), pb[0].to_bits());
        assert_eq!(pa[1].to_bits(), pb[1].to_bits());
    }
}

#[test]
fn test_protein_shortlists_on_bundle() {
    let bundle = prepare_bundle();

    // The highest-base protein tops every sample.
    let top = top_abundant(&bundle.matrix, &bundle.annotations, 5).unwrap();
    assert!(!top.proteins.is_empty());
    assert_eq!(top.proteins[0].n_samples, 8);

    let variable = highly_variable(&bundle.matrix, &bundle.annotations).unwrap();
    // Thresholds are quantiles of the data itself, so some but not all
    // proteins qualify.
    assert!(!variable.proteins.is_empty());
    assert!(variable.proteins.len() < bundle.matrix.n_proteins());
    for p in &variable.proteins {
        assert!(p.sd >= variable.sd_threshold);
        assert!(p.total >= variable.total_threshold);
    }
}

#[test]
fn test_feature_importance_on_bundle() {
    let bundle = prepare_bundle();
    let config = ImportanceConfig::default()
        .with_n_trees(30)
        .with_cv(4, 1)
        .with_seed(5);
    let result = feature_importance(
        &bundle.metadata,
        "Mechanism_Code",
        &["Age".to_string(), "Hypertension".to_string()],
        &config,
    )
    .unwrap();
    assert!(!result.ranking.is_empty());
    let total: f64 = result.ranking.iter().map(|r| r.importance).sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(result.n_models > 0);
}
