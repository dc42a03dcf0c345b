//! proteoclot - Exploratory clot proteomics CLI
//!
//! Command-line interface for preparing and exploring LFQ proteomics of
//! thrombus material with clinical metadata.

use clap::{Parser, Subcommand};
use proteoclot::analyze::{
    correlate_metadata_pcs, feature_importance, highly_variable, pca, top_abundant, umap,
    ImportanceConfig, UmapConfig,
};
use proteoclot::data::{
    derive_keys, join, load_combined_tsv, AnalysisBundle, CombinedTableConfig, SampleMetadata,
};
use proteoclot::error::Result;
use proteoclot::normalize::DEFAULT_LOG_OFFSET;
use proteoclot::pipeline::{Pipeline, PipelineConfig};
use std::collections::HashMap;
use std::path::PathBuf;

/// Exploratory proteomics analysis of clot composition
#[derive(Parser)]
#[command(name = "proteoclot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split, normalize, and filter the combined table; write a bundle
    Prepare {
        /// Path to the combined protein-group TSV
        #[arg(short = 'c', long)]
        combined: PathBuf,

        /// Path to the clinical metadata TSV
        #[arg(short, long)]
        metadata: PathBuf,

        /// Optional second metadata TSV joined on the derived sample key
        #[arg(short, long)]
        demographics: Option<PathBuf>,

        /// Output path for the analysis bundle (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Sample ID prefixes stripped before key derivation (comma-separated)
        #[arg(long, default_value = "Clot,TS-")]
        prefixes: String,

        /// Optional YAML file declaring fixed categorical domains
        /// (column -> allowed levels); an out-of-domain value is an error
        #[arg(long)]
        domains: Option<PathBuf>,

        /// Optional pipeline configuration YAML; default is the standard
        /// drop-empty / log2 / cyclic-loess / support-filter pipeline
        #[arg(long)]
        config: Option<PathBuf>,

        /// Offset added before the base-2 logarithm
        #[arg(long, default_value = "0.25")]
        log_offset: f64,

        /// Cyclic loess iterations
        #[arg(long, default_value = "3")]
        loess_iterations: usize,

        /// Loess span
        #[arg(long, default_value = "0.7")]
        loess_span: f64,

        /// Linear-space intensity a value must exceed to count as detected
        #[arg(long, default_value = "0.5")]
        min_intensity: f64,

        /// Minimum number of samples a protein must be detected in
        #[arg(long, default_value = "3")]
        min_samples: usize,
    },

    /// Generate an example pipeline configuration
    Example {
        /// Output path for the example YAML
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },

    /// Principal component analysis of the samples
    Pca {
        /// Path to the analysis bundle
        #[arg(short, long)]
        bundle: PathBuf,

        /// Number of components to retain
        #[arg(short = 'k', long, default_value = "5")]
        components: usize,

        /// Output path for scores TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// UMAP embedding of the samples
    Umap {
        /// Path to the analysis bundle
        #[arg(short, long)]
        bundle: PathBuf,

        /// Number of nearest neighbors
        #[arg(long, default_value = "15")]
        neighbors: usize,

        /// Minimum distance in the embedding
        #[arg(long, default_value = "0.1")]
        min_dist: f64,

        /// Optimization epochs
        #[arg(long, default_value = "300")]
        epochs: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output path for embedding TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Spearman correlation of metadata variables against PC scores
    Correlate {
        /// Path to the analysis bundle
        #[arg(short, long)]
        bundle: PathBuf,

        /// Metadata fields to test (comma-separated; default all fields)
        #[arg(short, long)]
        fields: Option<String>,

        /// Number of components to correlate against
        #[arg(short = 'k', long, default_value = "5")]
        components: usize,

        /// Significance cut-off for flagging
        #[arg(long, default_value = "0.1")]
        alpha: f64,

        /// Output path for correlation TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Random-forest importance of metadata fields for a response
    Importance {
        /// Path to the analysis bundle
        #[arg(short, long)]
        bundle: PathBuf,

        /// Categorical response column
        #[arg(short, long, default_value = "Mechanism_Code")]
        response: String,

        /// Predictor fields (comma-separated; default all other fields)
        #[arg(short, long)]
        fields: Option<String>,

        /// Trees per forest
        #[arg(long, default_value = "200")]
        trees: usize,

        /// Cross-validation folds
        #[arg(long, default_value = "10")]
        folds: usize,

        /// Cross-validation repeats
        #[arg(long, default_value = "3")]
        repeats: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output path for the ranking TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Proteins recurring among the most abundant across samples
    TopAbundant {
        /// Path to the analysis bundle
        #[arg(short, long)]
        bundle: PathBuf,

        /// Proteins per sample considered "top"
        #[arg(short = 'n', long, default_value = "10")]
        top_n: usize,

        /// Output path for the shortlist TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Proteins with both high variability and high abundance
    Variable {
        /// Path to the analysis bundle
        #[arg(short, long)]
        bundle: PathBuf,

        /// Output path for the shortlist TSV
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Prepare {
            combined,
            metadata,
            demographics,
            output,
            prefixes,
            domains,
            config,
            log_offset,
            loess_iterations,
            loess_span,
            min_intensity,
            min_samples,
        } => cmd_prepare(
            &combined,
            &metadata,
            demographics.as_ref(),
            &output,
            &prefixes,
            domains.as_ref(),
            config.as_ref(),
            log_offset,
            loess_iterations,
            loess_span,
            min_intensity,
            min_samples,
        ),

        Commands::Example { output } => cmd_example(&output),

        Commands::Pca {
            bundle,
            components,
            output,
        } => cmd_pca(&bundle, components, &output),

        Commands::Umap {
            bundle,
            neighbors,
            min_dist,
            epochs,
            seed,
            output,
        } => cmd_umap(&bundle, neighbors, min_dist, epochs, seed, &output),

        Commands::Correlate {
            bundle,
            fields,
            components,
            alpha,
            output,
        } => cmd_correlate(&bundle, fields.as_deref(), components, alpha, &output),

        Commands::Importance {
            bundle,
            response,
            fields,
            trees,
            folds,
            repeats,
            seed,
            output,
        } => cmd_importance(
            &bundle,
            &response,
            fields.as_deref(),
            trees,
            folds,
            repeats,
            seed,
            &output,
        ),

        Commands::TopAbundant {
            bundle,
            top_n,
            output,
        } => cmd_top_abundant(&bundle, top_n, &output),

        Commands::Variable { bundle, output } => cmd_variable(&bundle, &output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Prepare the analysis bundle from raw tables
#[allow(clippy::too_many_arguments)]
fn cmd_prepare(
    combined_path: &PathBuf,
    metadata_path: &PathBuf,
    demographics_path: Option<&PathBuf>,
    output_path: &PathBuf,
    prefixes_str: &str,
    domains_path: Option<&PathBuf>,
    config_path: Option<&PathBuf>,
    log_offset: f64,
    loess_iterations: usize,
    loess_span: f64,
    min_intensity: f64,
    min_samples: usize,
) -> Result<()> {
    let prefixes: Vec<String> = prefixes_str
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    eprintln!("Loading combined table from {:?}...", combined_path);
    let (annotations, matrix, split_report) =
        load_combined_tsv(combined_path, &CombinedTableConfig::default())?;
    eprintln!("{}", split_report);

    eprintln!("Loading metadata from {:?}...", metadata_path);
    let clinical = SampleMetadata::from_tsv(metadata_path)?;
    let (mut metadata, key_report) = clinical.derive_sample_keys(&prefixes)?;
    eprintln!("{}", key_report);

    if let Some(demo_path) = demographics_path {
        eprintln!("Joining demographics from {:?}...", demo_path);
        let demo = SampleMetadata::from_tsv(demo_path)?;
        let (demo, demo_keys) = demo.derive_sample_keys(&prefixes)?;
        eprintln!("{}", demo_keys);
        let (joined, join_report) = join(&metadata, &demo);
        eprintln!("{}", join_report);
        metadata = joined;
    }

    if let Some(path) = domains_path {
        eprintln!("Applying categorical domains from {:?}...", path);
        let yaml = std::fs::read_to_string(path)?;
        let domains: HashMap<String, Vec<String>> = serde_yaml::from_str(&yaml)?;
        metadata = metadata.with_categorical_domains(domains)?;
    }

    // Re-key the matrix columns the same way, keeping only samples with a
    // derivable key and a metadata record.
    let keys = derive_keys(matrix.sample_ids(), &prefixes)?;
    let mut indices = Vec::new();
    let mut keyed_ids = Vec::new();
    for (col, key) in keys.into_iter().enumerate() {
        if let Some(key) = key {
            if metadata.has_sample(&key) {
                indices.push(col);
                keyed_ids.push(key);
            }
        }
    }
    let n_dropped = matrix.n_samples() - indices.len();
    if n_dropped > 0 {
        eprintln!("Dropped {} samples without metadata", n_dropped);
    }
    let matrix = matrix.subset_samples(&indices)?.with_sample_ids(keyed_ids)?;
    let (metadata, _) = metadata.intersect_samples(matrix.sample_ids());

    eprintln!(
        "Prepared {} proteins x {} samples",
        matrix.n_proteins(),
        matrix.n_samples()
    );

    let pipeline = match config_path {
        Some(path) => {
            eprintln!("Loading pipeline configuration from {:?}...", path);
            let config_str = std::fs::read_to_string(path)?;
            Pipeline::from_config(&PipelineConfig::from_yaml(&config_str)?)
        }
        None => Pipeline::new()
            .name("standard")
            .drop_empty_proteins()
            .log2_offset(log_offset)
            .cyclic_loess(loess_iterations, loess_span)
            .filter_support(min_intensity, min_samples),
    };

    eprintln!("Running pipeline...");
    let result = pipeline.run(&matrix, &annotations)?;
    for report in &result.reports {
        eprintln!("{}", report);
    }

    let bundle = AnalysisBundle::new(result.matrix, result.annotations, metadata)?;
    eprintln!("Writing bundle to {:?}...", output_path);
    bundle.save(output_path)?;
    eprintln!(
        "Done! {} proteins x {} samples in bundle",
        bundle.matrix.n_proteins(),
        bundle.matrix.n_samples()
    );

    Ok(())
}

/// Generate example pipeline configuration
fn cmd_example(output_path: &PathBuf) -> Result<()> {
    let pipeline = Pipeline::new()
        .name("standard")
        .drop_empty_proteins()
        .log2_offset(DEFAULT_LOG_OFFSET)
        .cyclic_loess(3, 0.7)
        .filter_support(0.5, 3);

    let config = pipeline.to_config(Some(
        "Standard pre-processing: drop empty proteins, log2, cyclic loess, support filter",
    ));
    let yaml = config.to_yaml()?;

    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example pipeline to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}

/// Run PCA on a bundle
fn cmd_pca(bundle_path: &PathBuf, components: usize, output_path: &PathBuf) -> Result<()> {
    eprintln!("Loading bundle from {:?}...", bundle_path);
    let bundle = AnalysisBundle::load(bundle_path)?;

    let result = pca(&bundle.matrix, components)?;
    result.to_tsv(output_path)?;

    eprintln!("Wrote {} components to {:?}", result.n_components(), output_path);
    for (c, v) in result.explained.iter().enumerate() {
        eprintln!("  PC{}: {:.1}% of variance", c + 1, v * 100.0);
    }

    Ok(())
}

/// Run UMAP on a bundle
fn cmd_umap(
    bundle_path: &PathBuf,
    neighbors: usize,
    min_dist: f64,
    epochs: usize,
    seed: u64,
    output_path: &PathBuf,
) -> Result<()> {
    eprintln!("Loading bundle from {:?}...", bundle_path);
    let bundle = AnalysisBundle::load(bundle_path)?;

    let config = UmapConfig::default()
        .with_n_neighbors(neighbors)
        .with_min_dist(min_dist)
        .with_n_epochs(epochs)
        .with_seed(seed);
    let result = umap(&bundle.matrix, &config)?;
    result.to_tsv(output_path)?;

    eprintln!(
        "Embedded {} samples to {:?} (k = {}, seed = {})",
        result.embedding.len(),
        output_path,
        neighbors,
        seed
    );

    Ok(())
}

/// Correlate metadata fields against PC scores
fn cmd_correlate(
    bundle_path: &PathBuf,
    fields: Option<&str>,
    components: usize,
    alpha: f64,
    output_path: &PathBuf,
) -> Result<()> {
    eprintln!("Loading bundle from {:?}...", bundle_path);
    let bundle = AnalysisBundle::load(bundle_path)?;

    let fields = parse_fields(fields, &bundle.metadata, &[]);
    let pca_result = pca(&bundle.matrix, components)?;
    let result = correlate_metadata_pcs(&bundle.metadata, &fields, &pca_result, alpha)?;
    result.to_tsv(output_path)?;

    eprintln!(
        "Tested {} variables against {} components (alpha = {})",
        result.variables.len(),
        result.components.len(),
        result.alpha
    );
    for ex in &result.excluded {
        eprintln!("  excluded {}: {}", ex.name, ex.reason);
    }
    for (vi, var) in result.variables.iter().enumerate() {
        for (ci, comp) in result.components.iter().enumerate() {
            if result.is_significant(vi, ci) {
                eprintln!(
                    "  {} ~ {}: rho = {:.3}, p = {:.4}",
                    var,
                    comp,
                    result.rho[(vi, ci)],
                    result.p_values[(vi, ci)]
                );
            }
        }
    }

    Ok(())
}

/// Random-forest feature importance
#[allow(clippy::too_many_arguments)]
fn cmd_importance(
    bundle_path: &PathBuf,
    response: &str,
    fields: Option<&str>,
    trees: usize,
    folds: usize,
    repeats: usize,
    seed: u64,
    output_path: &PathBuf,
) -> Result<()> {
    eprintln!("Loading bundle from {:?}...", bundle_path);
    let bundle = AnalysisBundle::load(bundle_path)?;

    let fields = parse_fields(fields, &bundle.metadata, &[response]);
    let config = ImportanceConfig::default()
        .with_n_trees(trees)
        .with_cv(folds, repeats)
        .with_seed(seed);

    eprintln!(
        "Fitting {} trees x {} folds x {} repeats...",
        trees, folds, repeats
    );
    let result = feature_importance(&bundle.metadata, response, &fields, &config)?;
    result.to_tsv(output_path)?;
    println!("{}", result);

    Ok(())
}

/// Recurrently top-abundant proteins
fn cmd_top_abundant(bundle_path: &PathBuf, top_n: usize, output_path: &PathBuf) -> Result<()> {
    eprintln!("Loading bundle from {:?}...", bundle_path);
    let bundle = AnalysisBundle::load(bundle_path)?;

    let result = top_abundant(&bundle.matrix, &bundle.annotations, top_n)?;
    result.to_tsv(output_path)?;
    println!("{}", result);

    Ok(())
}

/// Highly variable proteins
fn cmd_variable(bundle_path: &PathBuf, output_path: &PathBuf) -> Result<()> {
    eprintln!("Loading bundle from {:?}...", bundle_path);
    let bundle = AnalysisBundle::load(bundle_path)?;

    let result = highly_variable(&bundle.matrix, &bundle.annotations)?;
    result.to_tsv(output_path)?;
    println!("{}", result);

    Ok(())
}

/// Expand a comma-separated field list, defaulting to all metadata columns
/// minus any excluded names.
fn parse_fields(fields: Option<&str>, metadata: &SampleMetadata, exclude: &[&str]) -> Vec<String> {
    match fields {
        Some(s) => s
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
        None => metadata
            .column_names()
            .iter()
            .filter(|c| !exclude.contains(&c.as_str()))
            .cloned()
            .collect(),
    }
}
