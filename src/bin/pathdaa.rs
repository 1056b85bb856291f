//! pathdaa - differential abundance analysis of predicted functional profiles.

use clap::{Args, Parser, Subcommand};
use pathway_daa::annotate::{AnnotationJoiner, KeggRest, PathwayType};
use pathway_daa::convert::convert_to_pathway;
use pathway_daa::correct::AdjustMethod;
use pathway_daa::data::{
    AbundanceTable, AnnotatedResultSet, FeatureKind, GeneFamilyId, MappingFormat, MappingTable,
    Metadata, PathwayId,
};
use pathway_daa::dispatch::{run_daa, DaaMethod, DaaRequest, MethodOptions, MethodRegistry};
use pathway_daa::error::Result;
use pathway_daa::pipeline::{Pipeline, PipelineConfig};
use pathway_daa::plot::{
    pathway_errorbar, pathway_heatmap, pathway_pca, Chart, ErrorBarOptions, HeatmapOptions,
    OrderPolicy, PlotStyle,
};
use pathway_daa::results::summarize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pathdaa")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run DAA and annotation from a YAML configuration file
    Run {
        #[arg(short, long)]
        config: PathBuf,

        /// Pathway abundance TSV
        #[arg(short, long)]
        abundance: PathBuf,

        #[command(flatten)]
        metadata: MetadataArgs,

        /// Output path for the annotated results TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Also write an error-bar chart (.svg or .png)
        #[arg(long)]
        plot: Option<PathBuf>,
    },

    /// Run one differential abundance method
    Daa {
        #[arg(short, long)]
        abundance: PathBuf,

        #[command(flatten)]
        metadata: MetadataArgs,

        /// Group column to compare
        #[arg(short, long)]
        group: String,

        /// ALDEx2, DESeq2, edgeR, limma voom, metagenomeSeq, Maaslin2, LinDA or Lefser
        #[arg(long)]
        method: DaaMethod,

        /// Reference level of the group column
        #[arg(short, long)]
        reference: Option<String>,

        #[arg(long, default_value = "BH")]
        adjust: AdjustMethod,

        /// Covariate column (repeatable)
        #[arg(long = "covariate")]
        covariates: Vec<String>,

        /// Only test these feature IDs (repeatable)
        #[arg(long = "select")]
        select: Vec<String>,

        /// Seed for Monte-Carlo methods
        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Aggregate a gene-family table into pathway abundances
    Convert {
        /// Gene-family abundance TSV
        #[arg(short, long)]
        abundance: PathBuf,

        /// Mapping TSV; the bundled KO to KEGG table when omitted
        #[arg(short, long)]
        mapping: Option<PathBuf>,

        /// Mapping rows are `pathway<TAB>member...` instead of pairs
        #[arg(long)]
        wide: bool,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Add pathway names, descriptions and classes to a results TSV
    Annotate {
        #[arg(short, long)]
        results: PathBuf,

        /// ko, ec, metacyc or kegg_pathway
        #[arg(short, long, default_value = "kegg_pathway")]
        pathway_type: PathwayType,

        /// Results were computed on KO to KEGG converted pathways
        #[arg(long)]
        ko_to_kegg: bool,

        /// Query KEGG for IDs missing from the bundled reference
        #[arg(long)]
        remote: bool,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Draw a chart
    Plot {
        #[command(subcommand)]
        kind: PlotKind,
    },

    /// Write an example pipeline configuration
    Example {
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List the available methods
    Methods,
}

#[derive(Args)]
struct MetadataArgs {
    /// Sample metadata TSV
    #[arg(short, long)]
    metadata: PathBuf,

    /// Sample ID column; the first column when omitted
    #[arg(long)]
    id_column: Option<String>,
}

impl MetadataArgs {
    fn load(&self) -> Result<Metadata> {
        match &self.id_column {
            Some(column) => Metadata::from_tsv_with_id_column(&self.metadata, column),
            None => Metadata::from_tsv(&self.metadata),
        }
    }
}

#[derive(Args)]
struct PlotInputs {
    #[arg(short, long)]
    abundance: PathBuf,

    #[command(flatten)]
    metadata: MetadataArgs,

    #[arg(short, long)]
    group: String,

    /// Chart file, .svg or .png
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long, default_value = "1000")]
    width: u32,

    #[arg(long, default_value = "700")]
    height: u32,

    #[arg(long)]
    title: Option<String>,
}

impl PlotInputs {
    fn style(&self) -> PlotStyle {
        let style = PlotStyle::default().size(self.width, self.height);
        match &self.title {
            Some(title) => style.title(title.clone()),
            None => style,
        }
    }
}

#[derive(Subcommand)]
enum PlotKind {
    /// Group means with error bars for significant features
    Errorbar {
        #[command(flatten)]
        inputs: PlotInputs,

        /// Results TSV, annotated or not
        #[arg(short, long)]
        results: PathBuf,

        /// Method label to plot; the first one in the file when omitted
        #[arg(long)]
        method: Option<String>,

        #[arg(long, default_value = "0.05")]
        p_value_bar: f64,

        /// group, p_value, pathway_class or name
        #[arg(long, default_value = "group")]
        order: OrderPolicy,

        /// Only plot these feature IDs (repeatable)
        #[arg(long = "select")]
        select: Vec<String>,
    },

    /// Row z-scores of relative abundance
    Heatmap {
        #[command(flatten)]
        inputs: PlotInputs,

        /// Features to show (repeatable); all when omitted
        #[arg(long = "feature")]
        features: Vec<String>,

        /// Results TSV used for names and ordering
        #[arg(short, long)]
        results: Option<PathBuf>,

        #[arg(long, default_value = "group")]
        order: OrderPolicy,
    },

    /// Samples on the first two principal components
    Pca {
        #[command(flatten)]
        inputs: PlotInputs,
    },
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Run {
            config,
            abundance,
            metadata,
            output,
            plot,
        } => cmd_run(&config, &abundance, &metadata, &output, plot.as_deref()),

        Commands::Daa {
            abundance,
            metadata,
            group,
            method,
            reference,
            adjust,
            covariates,
            select,
            seed,
            output,
        } => {
            let mut request = DaaRequest::new(group, method).adjust(adjust).options(MethodOptions {
                seed,
                ..Default::default()
            });
            request.reference = reference;
            request.covariates = covariates;
            if !select.is_empty() {
                request = request.select(select);
            }
            cmd_daa(&request, &abundance, &metadata, &output)
        }

        Commands::Convert {
            abundance,
            mapping,
            wide,
            output,
        } => cmd_convert(&abundance, mapping.as_deref(), wide, &output),

        Commands::Annotate {
            results,
            pathway_type,
            ko_to_kegg,
            remote,
            output,
        } => cmd_annotate(&results, pathway_type, ko_to_kegg, remote, &output),

        Commands::Plot { kind } => cmd_plot(kind),

        Commands::Example { output } => cmd_example(&output),

        Commands::Methods => {
            cmd_methods();
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn cmd_run(
    config_path: &Path,
    abundance_path: &Path,
    metadata: &MetadataArgs,
    output_path: &Path,
    plot_path: Option<&Path>,
) -> Result<()> {
    let config = PipelineConfig::load(config_path)?;
    let abundance = AbundanceTable::<PathwayId>::from_tsv(abundance_path)?;
    let metadata = metadata.load()?;
    log::info!(
        "loaded {} features x {} samples",
        abundance.n_features(),
        abundance.n_samples()
    );

    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run(&abundance, &metadata)?;
    output.annotated.to_tsv(output_path)?;
    log::info!("wrote {} rows to {}", output.annotated.len(), output_path.display());
    if !output.warnings.is_empty() {
        log::warn!("{} annotation lookup(s) failed", output.warnings.len());
    }

    if let Some(plot_path) = plot_path {
        pipeline.errorbar(&abundance, &metadata, &output)?.save(plot_path)?;
    }
    Ok(())
}

fn cmd_daa(
    request: &DaaRequest,
    abundance_path: &Path,
    metadata: &MetadataArgs,
    output_path: &Path,
) -> Result<()> {
    let abundance = AbundanceTable::<PathwayId>::from_tsv(abundance_path)?;
    let metadata = metadata.load()?;

    let results = run_daa(request, &abundance, &metadata)?;
    results.to_tsv(output_path)?;
    for summary in summarize(&results, 0.05) {
        log::info!(
            "{}: {} of {} features with p_adjust < {}",
            summary.method,
            summary.significant,
            summary.tested,
            summary.alpha
        );
    }
    Ok(())
}

fn cmd_convert(
    abundance_path: &Path,
    mapping_path: Option<&Path>,
    wide: bool,
    output_path: &Path,
) -> Result<()> {
    let table = AbundanceTable::<GeneFamilyId>::from_tsv(abundance_path)?;
    let mapping = match mapping_path {
        Some(path) => {
            let format = if wide { MappingFormat::Wide } else { MappingFormat::Pairs };
            MappingTable::from_tsv(path, format)?
        }
        None => MappingTable::bundled_ko_to_kegg()?,
    };

    let conversion = convert_to_pathway(&table, &mapping)?;
    if !conversion.unmapped.is_empty() {
        log::warn!("{} gene families had no pathway", conversion.unmapped.count());
    }
    conversion.table.to_tsv(output_path)?;
    log::info!(
        "wrote {} pathways x {} samples to {}",
        conversion.table.n_features(),
        conversion.table.n_samples(),
        output_path.display()
    );
    Ok(())
}

fn cmd_annotate(
    results_path: &Path,
    pathway_type: PathwayType,
    ko_to_kegg: bool,
    remote: bool,
    output_path: &Path,
) -> Result<()> {
    let kind = match pathway_type.resolve(ko_to_kegg) {
        PathwayType::Ko | PathwayType::Ec => FeatureKind::GeneFamily,
        PathwayType::MetaCyc | PathwayType::KeggPathway => FeatureKind::Pathway,
    };
    let rows = AnnotatedResultSet::from_tsv(results_path, kind, AdjustMethod::default())?;

    let mut joiner = AnnotationJoiner::new()?;
    if remote {
        joiner = joiner.remote(KeggRest::new());
    }
    let annotated = joiner.annotate(&rows.results, pathway_type, ko_to_kegg);
    for warning in &annotated.warnings {
        log::warn!("{}", warning);
    }
    log::info!("annotated {} of {} rows", annotated.n_annotated(), annotated.results.len());

    AnnotatedResultSet {
        results: annotated.results,
        ..rows
    }
    .to_tsv(output_path)
}

fn cmd_plot(kind: PlotKind) -> Result<()> {
    let (chart, output): (Chart, PathBuf) = match kind {
        PlotKind::Errorbar {
            inputs,
            results,
            method,
            p_value_bar,
            order,
            select,
        } => {
            let abundance = AbundanceTable::<PathwayId>::from_tsv(&inputs.abundance)?;
            let metadata = inputs.metadata.load()?;
            let results = AnnotatedResultSet::from_tsv(
                &results,
                FeatureKind::Pathway,
                AdjustMethod::default(),
            )?;
            let options = ErrorBarOptions {
                method,
                p_value_bar,
                select: (!select.is_empty()).then_some(select),
                order,
                ..Default::default()
            };
            let chart = pathway_errorbar(
                &abundance,
                &metadata,
                &inputs.group,
                &results.results,
                &options,
                &inputs.style(),
            )?;
            (chart, inputs.output)
        }
        PlotKind::Heatmap {
            inputs,
            features,
            results,
            order,
        } => {
            let abundance = AbundanceTable::<PathwayId>::from_tsv(&inputs.abundance)?;
            let metadata = inputs.metadata.load()?;
            let results = results
                .map(|path| {
                    AnnotatedResultSet::from_tsv(
                        path,
                        FeatureKind::Pathway,
                        AdjustMethod::default(),
                    )
                })
                .transpose()?;
            let options = HeatmapOptions {
                order,
                results: results.as_ref().map(|r| r.results.as_slice()),
                ..Default::default()
            };
            let chart = pathway_heatmap(
                &abundance,
                &metadata,
                &inputs.group,
                &features,
                &options,
                &inputs.style(),
            )?;
            (chart, inputs.output)
        }
        PlotKind::Pca { inputs } => {
            let abundance = AbundanceTable::<PathwayId>::from_tsv(&inputs.abundance)?;
            let metadata = inputs.metadata.load()?;
            let chart = pathway_pca(&abundance, &metadata, &inputs.group, &inputs.style())?;
            (chart, inputs.output)
        }
    };
    chart.save(&output)
}

fn cmd_example(output_path: &Path) -> Result<()> {
    let yaml = PipelineConfig::example().to_yaml()?;
    std::fs::write(output_path, &yaml)?;
    log::info!("wrote example pipeline to {}", output_path.display());
    println!("{}", yaml);
    Ok(())
}

fn cmd_methods() {
    println!("{:<16}{:<22}{:<10}{:<12}covariates", "method", "input", "levels", "reference");
    for adapter in MethodRegistry::global().iter() {
        let levels = adapter
            .max_levels
            .map(|n| n.to_string())
            .unwrap_or_else(|| "any".to_string());
        let reference = if adapter.needs_baseline { "required" } else { "optional" };
        println!(
            "{:<16}{:<22}{:<10}{:<12}{:?}",
            adapter.method.name(),
            format!("{:?}", adapter.encoding),
            levels,
            reference,
            adapter.covariates
        );
        if !adapter.sub_methods.is_empty() {
            println!("{:<16}sub-methods: {}", "", adapter.sub_methods.join(", "));
        }
    }
}
