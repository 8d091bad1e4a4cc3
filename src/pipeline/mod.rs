// Thu Oct 15 2026 - Alex

pub mod cancel;
pub mod error;
pub mod layout;
pub mod report;
pub mod sink;

pub use cancel::CancellationToken;
pub use error::PipelineError;
pub use layout::{BaseAccess, LayoutBase, LayoutRequest};
pub use report::{AcceptedClass, HierarchyReport, PipelineStats, Rejection};
pub use sink::{ConstructorSink, LayoutSink};

use crate::config::AnalysisConfig;
use crate::memory::{Address, ElfImage, ImageAccessor, SymbolSource};
use crate::rtti::{ClassResolver, ClassTypeInfo, RttiError, RttiResult, TypeInfoDecoder, VttDecoder};
use crate::utils::logging::{ProgressLogger, ScopedTimer};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

enum Outcome {
    Skipped,
    Accepted(AcceptedClass),
    Rejected(Rejection),
    /// The token fired before the symbol was analyzed
    Cancelled,
}

/// Enumerates RTTI symbols, keeps the class records that validate and hands
/// them to the registered sinks.
pub struct HierarchyBuildPipeline {
    symbols: Arc<dyn SymbolSource>,
    config: AnalysisConfig,
    resolver: Arc<ClassResolver>,
    vtts: VttDecoder,
    layout_sinks: Vec<Arc<dyn LayoutSink>>,
    constructor_sinks: Vec<Arc<dyn ConstructorSink>>,
    token: CancellationToken,
}

impl HierarchyBuildPipeline {
    pub fn new(
        image: Arc<dyn ImageAccessor>,
        symbols: Arc<dyn SymbolSource>,
        config: AnalysisConfig,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;
        let decoder = Arc::new(TypeInfoDecoder::new(image, &config));
        let resolver = Arc::new(ClassResolver::new(decoder, &config));
        let vtts = VttDecoder::new(resolver.clone(), &config);
        Ok(Self {
            symbols,
            config,
            resolver,
            vtts,
            layout_sinks: Vec::new(),
            constructor_sinks: Vec::new(),
            token: CancellationToken::new(),
        })
    }

    pub fn from_elf<P: AsRef<Path>>(path: P, config: AnalysisConfig) -> Result<Self, PipelineError> {
        let image = Arc::new(ElfImage::load(path)?);
        Self::new(image.clone(), image, config)
    }

    pub fn with_layout_sink(mut self, sink: Arc<dyn LayoutSink>) -> Self {
        self.layout_sinks.push(sink);
        self
    }

    pub fn with_constructor_sink(mut self, sink: Arc<dyn ConstructorSink>) -> Self {
        self.constructor_sinks.push(sink);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn resolver(&self) -> &Arc<ClassResolver> {
        &self.resolver
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// One pass over every RTTI symbol. Per-class failures land in
    /// `rejected`; cancellation returns what was accepted so far.
    pub fn run(&self) -> Result<HierarchyReport, PipelineError> {
        let _timer = ScopedTimer::new("hierarchy pipeline");
        let start = Instant::now();
        let candidates = self.candidates();
        let mut report = HierarchyReport::default();
        report.stats.symbols = candidates.len();
        if candidates.is_empty() {
            log::warn!("No symbols with prefix {}", self.config.type_info_symbol_prefix);
        }
        if !self.resolver.decoder().abi().has_type_info_tables() {
            log::warn!("image binds none of the class type_info vtables, no class records to decode");
            report.finalize(start.elapsed());
            return Ok(report);
        }

        let progress = ProgressLogger::new("rtti", candidates.len());
        let outcomes = if self.config.parallel && candidates.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.thread_count)
                .build()
                .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;
            pool.install(|| {
                candidates
                    .par_iter()
                    .map(|(symbol, address)| {
                        let outcome = self.process(symbol, *address);
                        if !matches!(outcome, Outcome::Cancelled) {
                            progress.inc();
                        }
                        outcome
                    })
                    .collect::<Vec<_>>()
            })
        } else {
            let mut outcomes = Vec::with_capacity(candidates.len());
            for (symbol, address) in &candidates {
                let outcome = self.process(symbol, *address);
                if matches!(outcome, Outcome::Cancelled) {
                    break;
                }
                outcomes.push(outcome);
                progress.inc();
            }
            outcomes
        };
        progress.finish();

        for outcome in outcomes {
            match outcome {
                Outcome::Accepted(class) => report.accepted.push(class),
                Outcome::Rejected(rejection) => report.rejected.push(rejection),
                Outcome::Skipped => report.stats.not_type_info += 1,
                Outcome::Cancelled => {}
            }
        }
        report.stats.processed =
            report.accepted.len() + report.rejected.len() + report.stats.not_type_info;
        report.cancelled = self.token.is_cancelled();
        report.finalize(start.elapsed());

        if report.cancelled {
            log::warn!("cancelled after {} of {} symbols", report.stats.processed, report.stats.symbols);
        }
        log::info!("{}", report);
        Ok(report)
    }

    /// RTTI symbols, one per address, in address order.
    fn candidates(&self) -> Vec<(String, Address)> {
        let mut symbols = self.symbols.symbols_with_prefix(&self.config.type_info_symbol_prefix);
        symbols.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let mut seen = HashSet::new();
        symbols.retain(|(_, address)| seen.insert(*address));
        symbols
    }

    fn process(&self, symbol: &str, address: Address) -> Outcome {
        match self.analyze(symbol, address) {
            Ok((class, accepted)) => {
                self.emit(&class, &accepted);
                Outcome::Accepted(accepted)
            }
            Err(RttiError::Cancelled) => Outcome::Cancelled,
            Err(e) if e.is_not_type_info() => Outcome::Skipped,
            Err(e) => {
                log::debug!("{} rejected: {}", symbol, e);
                Outcome::Rejected(Rejection {
                    address,
                    symbol: symbol.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn analyze(&self, symbol: &str, address: Address) -> RttiResult<(Arc<ClassTypeInfo>, AcceptedClass)> {
        self.token.check()?;
        self.resolver.decoder().decode(address)?;
        let class = self.resolver.validate(address)?;

        let vtables = self.resolver.vtable_decoder();
        let vtable = vtables.locate(&class);
        if let Some(vt) = &vtable {
            vtables.validate(vt)?;
        }
        let sub_object_vtables = vtables.locate_all(&class);
        let virtual_parents = self.resolver.virtual_parent_addresses(address)?;

        let mut vtt_dropped = false;
        let vtt = match &vtable {
            Some(primary) if !virtual_parents.is_empty() => match self.vtts.locate(&class, primary)? {
                Some(model) if self.vtts.is_valid(&model) => Some(model),
                Some(model) => {
                    log::warn!(
                        "{}: VTT @ {:#x} does not match the hierarchy, using class-only mode",
                        class.display_name(),
                        model.address
                    );
                    vtt_dropped = true;
                    None
                }
                None => None,
            },
            _ => None,
        };

        let accepted = AcceptedClass {
            address,
            symbol: symbol.to_string(),
            mangled_name: class.mangled_name().to_string(),
            display_name: class.display_name(),
            unique_name: self.resolver.unique_type_name(address)?,
            variant: class.variant(),
            parents: class.parents().to_vec(),
            virtual_parents: virtual_parents.iter().copied().collect(),
            is_abstract: self.resolver.is_abstract(address)?,
            vtable,
            sub_object_vtables,
            vtt,
            vtt_dropped,
            diagnostics: class.diagnostics().to_vec(),
        };
        Ok((class, accepted))
    }

    fn emit(&self, class: &Arc<ClassTypeInfo>, accepted: &AcceptedClass) {
        if !self.layout_sinks.is_empty() {
            let request = LayoutRequest::new(accepted, &self.resolver);
            for sink in &self.layout_sinks {
                sink.submit(request.clone());
            }
        }
        for sink in &self.constructor_sinks {
            sink.submit(class.clone(), accepted.vtt.clone());
        }
    }
}
