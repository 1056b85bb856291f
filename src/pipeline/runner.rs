//! End-to-end runs: conversion, DAA, annotation and charts.

use crate::annotate::{AnnotationJoiner, AnnotationSource, AnnotationWarning, KeggRest};
use crate::convert::{convert_to_pathway, UnmappedFeatures};
use crate::data::{
    AbundanceTable, AnnotatedResultSet, DaaResultSet, FeatureId, GeneFamilyId, MappingTable,
    Metadata,
};
use crate::dispatch::run_daa;
use crate::error::Result;
use crate::pipeline::PipelineConfig;
use crate::plot::{pathway_errorbar, Chart, ErrorBarOptions};
use crate::results::{summarize, MethodSummary};

/// Everything one run produced.
#[derive(Debug)]
pub struct PipelineOutput {
    pub results: DaaResultSet,
    /// `results` joined with pathway information; unannotated when
    /// annotation is switched off.
    pub annotated: AnnotatedResultSet,
    pub warnings: Vec<AnnotationWarning>,
    /// Gene families dropped by the conversion step, if it ran.
    pub unmapped: Option<UnmappedFeatures>,
}

impl PipelineOutput {
    pub fn summary(&self, alpha: f64) -> Vec<MethodSummary> {
        summarize(&self.results, alpha)
    }
}

/// A validated [`PipelineConfig`] ready to run.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    joiner: AnnotationJoiner,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let mut joiner = AnnotationJoiner::new()?;
        if config.remote {
            joiner = joiner.remote(KeggRest::new());
        }
        Ok(Self { config, joiner })
    }

    /// Replace the remote annotation source.
    pub fn with_remote(mut self, source: impl AnnotationSource + 'static) -> Self {
        self.joiner = self.joiner.remote(source);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Test `abundance`, then annotate the results.
    pub fn run<I: FeatureId>(
        &self,
        abundance: &AbundanceTable<I>,
        metadata: &Metadata,
    ) -> Result<PipelineOutput> {
        let config = &self.config;
        let results = run_daa(&config.request(), abundance, metadata)?;
        log::info!("{}: {}", config.method, results.summary());

        let (annotated, warnings) = if config.annotate {
            let (annotated, warnings) =
                self.joiner.annotate_set(&results, config.pathway_type, config.ko_to_kegg);
            for warning in &warnings {
                log::warn!("annotation: {}", warning);
            }
            (annotated, warnings)
        } else {
            let rows =
                results.iter().cloned().map(crate::data::AnnotatedResult::from_result).collect();
            (
                AnnotatedResultSet {
                    feature_kind: results.feature_kind,
                    adjust: results.adjust,
                    results: rows,
                },
                Vec::new(),
            )
        };

        Ok(PipelineOutput {
            results,
            annotated,
            warnings,
            unmapped: None,
        })
    }

    /// Convert a gene-family table to pathways, then [`run`](Self::run) it.
    pub fn run_gene_families(
        &self,
        table: &AbundanceTable<GeneFamilyId>,
        mapping: &MappingTable,
        metadata: &Metadata,
    ) -> Result<PipelineOutput> {
        let conversion = convert_to_pathway(table, mapping)?;
        if !conversion.unmapped.is_empty() {
            log::warn!(
                "{} gene families had no pathway and were dropped",
                conversion.unmapped.count()
            );
        }
        let mut output = self.run(&conversion.table, metadata)?;
        output.unmapped = Some(conversion.unmapped);
        Ok(output)
    }

    /// Error-bar chart of the significant features of a finished run.
    pub fn errorbar<I: FeatureId>(
        &self,
        abundance: &AbundanceTable<I>,
        metadata: &Metadata,
        output: &PipelineOutput,
    ) -> Result<Chart> {
        let config = &self.config;
        let options = ErrorBarOptions {
            method: None,
            p_value_bar: config.p_value_bar,
            select: config.select.clone(),
            order: config.order,
            ..Default::default()
        };
        pathway_errorbar(
            abundance,
            metadata,
            &config.group,
            &output.annotated.results,
            &options,
            &config.style,
        )
    }
}
