//! Run orchestration.
//!
//! The [`Executor`] parses documents, plans blocks into units and runs the
//! units on a bounded worker pool. An independent block is a unit of one; all
//! blocks of a document that share a group form one sequential unit with a
//! shared working directory. Results are attributed to document-order slots
//! in an [`Aggregator`], so the summary order never depends on scheduling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};

use doctest_core::{
    emit_block_finished, emit_block_started, emit_run_finished, emit_run_started, run_span,
    AggregateError, Aggregator, BlockId, BlockStatus, CodeBlock, DocTestConfig, Document,
    DocumentFailure, ErrorKind, EventBus, MarkdownParser, Notification, Parser, RunSummary,
    SkipReason, TestError, TestResult,
};

use crate::context::{CancelToken, ExecutionContext};
use crate::dispatch::Dispatcher;
use crate::registry::RunnerRegistry;

/// A schedulable set of blocks, each paired with its aggregation slot.
#[derive(Debug)]
struct Unit {
    group: Option<String>,
    blocks: Vec<(usize, CodeBlock)>,
}

/// Drives complete runs over a set of documents.
pub struct Executor {
    config: Arc<DocTestConfig>,
    parser: Arc<dyn Parser>,
    dispatcher: Dispatcher,
    events: Option<EventBus>,
}

impl Executor {
    /// Executor with the built-in and configured runners and a markdown
    /// parser honouring the config's parse options.
    pub fn new(config: DocTestConfig) -> Self {
        let registry = RunnerRegistry::from_config(&config);
        let parser = Arc::new(MarkdownParser::new(config.parse_options()));
        Self {
            config: Arc::new(config),
            parser,
            dispatcher: Dispatcher::new(registry),
            events: None,
        }
    }

    pub fn with_registry(mut self, registry: RunnerRegistry) -> Self {
        self.dispatcher = Dispatcher::new(registry);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = parser;
        self
    }

    /// Publish lifecycle notifications on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &DocTestConfig {
        &self.config
    }

    pub fn registry(&self) -> &RunnerRegistry {
        self.dispatcher.registry()
    }

    pub fn parser(&self) -> Arc<dyn Parser> {
        Arc::clone(&self.parser)
    }

    /// Load and run the documents at `paths`. Unreadable files are reported
    /// as document errors in the summary.
    pub async fn run_paths(
        &self,
        paths: &[PathBuf],
        cancel: &CancelToken,
    ) -> Result<RunSummary, AggregateError> {
        let mut documents = Vec::with_capacity(paths.len());
        let mut failures = Vec::new();
        for path in paths {
            match Document::load_async(path).await {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load document");
                    failures.push(DocumentFailure {
                        file: path.display().to_string(),
                        line: None,
                        message: e.to_string(),
                    });
                }
            }
        }
        self.execute(&documents, failures, cancel).await
    }

    /// Run every selected block of `documents`.
    ///
    /// Parse failures do not abort the run: the document is recorded in
    /// `document_errors` and contributes no results.
    pub async fn run(
        &self,
        documents: &[Document],
        cancel: &CancelToken,
    ) -> Result<RunSummary, AggregateError> {
        self.execute(documents, Vec::new(), cancel).await
    }

    /// Run a single file, as watch mode does on change.
    pub async fn run_file(
        &self,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<RunSummary, AggregateError> {
        self.run_paths(&[path.to_path_buf()], cancel).await
    }

    async fn execute(
        &self,
        documents: &[Document],
        mut failures: Vec<DocumentFailure>,
        cancel: &CancelToken,
    ) -> Result<RunSummary, AggregateError> {
        let filter = match self.config.filter_regex() {
            Ok(filter) => filter,
            Err(e) => {
                warn!(error = %e, "ignoring invalid filter");
                None
            }
        };

        let mut blocks = Vec::new();
        for document in documents {
            match document.blocks(self.parser.as_ref()) {
                Ok(found) => {
                    let before = blocks.len();
                    blocks.extend(found.into_iter().filter(|b| selected(filter.as_ref(), b)));
                    debug!(
                        file = %document.path(),
                        selected = blocks.len() - before,
                        "document parsed"
                    );
                }
                Err(e) => {
                    warn!(file = %e.file, line = e.line, error = %e.message, "failed to parse document");
                    failures.push(DocumentFailure {
                        file: e.file.clone(),
                        line: Some(e.line),
                        message: e.message.clone(),
                    });
                }
            }
        }

        let aggregator = Arc::new(Aggregator::new(blocks.len()));
        for failure in failures {
            aggregator.record_document_error(failure).await;
        }
        let run_id = aggregator.run_id().to_string();

        self.schedule(blocks, aggregator, cancel)
            .instrument(run_span(&run_id))
            .await
    }

    async fn schedule(
        &self,
        blocks: Vec<CodeBlock>,
        aggregator: Arc<Aggregator>,
        cancel: &CancelToken,
    ) -> Result<RunSummary, AggregateError> {
        let run_id = aggregator.run_id().to_string();
        emit_run_started(&run_id, blocks.len(), self.config.max_workers);

        let index: Vec<(BlockId, String)> = blocks
            .iter()
            .map(|b| (b.id.clone(), b.language.clone()))
            .collect();
        let units = plan_units(blocks);
        info!(units = units.len(), "scheduling units");

        let worker = Worker {
            config: Arc::clone(&self.config),
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
            aggregator: Arc::clone(&aggregator),
            cancel: cancel.clone(),
        };
        let sem = Arc::new(Semaphore::new(self.config.max_workers.max(1)));

        let mut tasks = Vec::with_capacity(units.len());
        for unit in units {
            let worker = worker.clone();
            let sem = Arc::clone(&sem);
            let task = async move {
                let _permit = sem.acquire_owned().await.ok();
                worker.run_unit(unit).await;
            };
            tasks.push(tokio::spawn(task.in_current_span()));
        }

        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                warn!(error = %e, "unit task aborted");
            }
        }

        // A panicked unit leaves its slots empty; account for them.
        for slot in aggregator.missing_slots().await {
            let (id, language) = &index[slot];
            let result = TestResult::failed(
                id.clone(),
                language,
                0,
                TestError {
                    kind: ErrorKind::Spawn,
                    message: "execution worker aborted before producing a result".to_string(),
                    line: id.line,
                },
                None,
            );
            worker.finish_block(slot, result).await;
        }

        let summary = aggregator.finish().await?;
        emit_run_finished(&summary);
        if let Some(events) = &self.events {
            events.publish(Notification::RunComplete {
                summary: summary.clone(),
            });
        }
        Ok(summary)
    }
}

/// Per-run state shared by unit tasks.
#[derive(Clone)]
struct Worker {
    config: Arc<DocTestConfig>,
    dispatcher: Dispatcher,
    events: Option<EventBus>,
    aggregator: Arc<Aggregator>,
    cancel: CancelToken,
}

impl Worker {
    async fn run_unit(&self, unit: Unit) {
        // Kept alive until every block of the unit has finished.
        let scratch = match &self.config.working_dir {
            Some(_) => None,
            None => match tempfile::Builder::new().prefix("doctest-work-").tempdir() {
                Ok(dir) => Some(dir),
                Err(e) => {
                    warn!(error = %e, "failed to create working directory");
                    None
                }
            },
        };
        let working_dir = self
            .config
            .working_dir
            .clone()
            .or_else(|| scratch.as_ref().map(|dir| dir.path().to_path_buf()))
            .unwrap_or_else(std::env::temp_dir);

        let ctx = ExecutionContext::new(working_dir)
            .with_timeout(self.config.timeout())
            .with_env(self.config.env.clone())
            .with_cancel(self.cancel.clone());

        let mut failed_upstream: Option<BlockId> = None;
        for (slot, mut block) in unit.blocks {
            let result = if block.is_skipped() {
                TestResult::skipped(block.id.clone(), &block.language, SkipReason::Annotated)
            } else if self.cancel.is_cancelled() {
                TestResult::skipped(block.id.clone(), &block.language, SkipReason::Cancelled)
            } else if let Some(upstream) = &failed_upstream {
                debug!(block = %block.id, upstream = %upstream, "skipping after group failure");
                TestResult::skipped(block.id.clone(), &block.language, SkipReason::DependencyFailed)
            } else {
                self.execute_block(&mut block, &ctx).await
            };

            if let Err(e) = block.transition(result.status.into()) {
                warn!(block = %block.id, error = %e, "unexpected status transition");
            }
            if unit.group.is_some() && result.error.is_some() && failed_upstream.is_none() {
                failed_upstream = Some(block.id.clone());
            }
            self.finish_block(slot, result).await;
        }
    }

    async fn execute_block(&self, block: &mut CodeBlock, ctx: &ExecutionContext) -> TestResult {
        if let Err(e) = block.transition(BlockStatus::Running) {
            warn!(block = %block.id, error = %e, "unexpected status transition");
        }
        emit_block_started(&block.id, &block.language);
        if let Some(events) = &self.events {
            events.publish(Notification::TestStarted {
                block: block.id.clone(),
                language: block.language.clone(),
            });
        }
        self.dispatcher.dispatch(block, ctx).await
    }

    async fn finish_block(&self, slot: usize, result: TestResult) {
        emit_block_finished(&result);
        if let Some(events) = &self.events {
            events.publish(Notification::for_result(result.clone()));
        }
        if let Err(e) = self.aggregator.record(slot, result).await {
            warn!(slot, error = %e, "result rejected by aggregator");
        }
    }
}

/// Group blocks into units, preserving document order inside each unit.
fn plan_units(blocks: Vec<CodeBlock>) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    let mut groups: HashMap<(String, String), usize> = HashMap::new();

    for (slot, block) in blocks.into_iter().enumerate() {
        let Some(group) = block.group().map(str::to_string) else {
            units.push(Unit {
                group: None,
                blocks: vec![(slot, block)],
            });
            continue;
        };
        let key = (block.id.file.clone(), group.clone());
        match groups.get(&key) {
            Some(&at) => units[at].blocks.push((slot, block)),
            None => {
                groups.insert(key, units.len());
                units.push(Unit {
                    group: Some(group),
                    blocks: vec![(slot, block)],
                });
            }
        }
    }
    units
}

/// Filter on the `<file>:<line>` name or the language tag.
fn selected(filter: Option<&Regex>, block: &CodeBlock) -> bool {
    match filter {
        Some(re) => re.is_match(&block.id.to_string()) || re.is_match(&block.language),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctest_core::{MarkdownParser, ParseOptions};

    fn blocks(src: &str) -> Vec<CodeBlock> {
        MarkdownParser::new(ParseOptions::default())
            .parse(&Document::new("doc.md", src))
            .unwrap()
    }

    #[test]
    fn test_plan_units_groups_per_document() {
        let src = "```sh group=db\na\n```\n```sh\nb\n```\n```sh group=db\nc\n```\n```sh shared\nd\n```\n";
        let units = plan_units(blocks(src));
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].group.as_deref(), Some("db"));
        let slots: Vec<usize> = units[0].blocks.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![0, 2]);
        assert!(units[1].group.is_none());
        assert_eq!(units[2].group.as_deref(), Some("shared"));
    }

    #[test]
    fn test_same_group_name_in_two_documents_is_two_units() {
        let parser = MarkdownParser::default();
        let mut all = parser
            .parse(&Document::new("a.md", "```sh group=g\na\n```\n"))
            .unwrap();
        all.extend(
            parser
                .parse(&Document::new("b.md", "```sh group=g\nb\n```\n"))
                .unwrap(),
        );
        assert_eq!(plan_units(all).len(), 2);
    }

    #[test]
    fn test_selected_matches_name_or_language() {
        let b = &blocks("text\n```python\nx\n```\n")[0];
        assert!(selected(None, b));
        assert!(selected(Some(&Regex::new("^doc.md:2$").unwrap()), b));
        assert!(selected(Some(&Regex::new("pyth").unwrap()), b));
        assert!(!selected(Some(&Regex::new("ruby").unwrap()), b));
    }
}
