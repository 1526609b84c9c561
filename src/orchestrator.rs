// Import Orchestrator
// Drives detect -> parse -> validate -> dedup -> persist -> summarize on a worker
// thread and streams outcomes to the caller over a bounded channel

use chrono::NaiveDate;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::aggregator::ResultAggregator;
use crate::config::ImportConfig;
use crate::deduplication::Deduplicator;
use crate::detector::FormatDetector;
use crate::error::{ConfigError, ErrorKind, ImportError, LedgerError};
use crate::ledger::Ledger;
use crate::mapper::RowMapper;
use crate::model::RawRow;
use crate::outcome::ImportOutcome;
use crate::parser::{FormatParser, ParserRegistry, Rows};
use crate::rules::RuleEngine;
use crate::source::ImportSource;

/// Receives every outcome before the caller does
pub trait ImportObserver: Send + Sync {
    fn on_outcome(&self, outcome: &ImportOutcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Detecting,
    Parsing,
    PersistingRow,
    Summarizing,
    Completed,
    Failed,
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportState::Idle => "idle",
            ImportState::Detecting => "detecting",
            ImportState::Parsing => "parsing",
            ImportState::PersistingRow => "persisting_row",
            ImportState::Summarizing => "summarizing",
            ImportState::Completed => "completed",
            ImportState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// IMPORTER
// ============================================================================

pub struct Importer {
    config: Arc<ImportConfig>,
    registry: Arc<ParserRegistry>,
    rules: Arc<RuleEngine>,
    ledger: Arc<dyn Ledger>,
    observer: Option<Arc<dyn ImportObserver>>,
    today: Option<NaiveDate>,
}

impl Importer {
    /// Standard parsers, builtin rules merged with `config.rules_file`
    pub fn new(config: ImportConfig, ledger: Arc<dyn Ledger>) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut rules = RuleEngine::builtin();
        if let Some(path) = &config.rules_file {
            rules = rules.merged_with(RuleEngine::from_file(path)?);
        }
        debug!(rules = rules.rule_count(), "category rules loaded");

        Ok(Importer {
            registry: Arc::new(ParserRegistry::standard(&config)),
            config: Arc::new(config),
            rules: Arc::new(rules),
            ledger,
            observer: None,
            today: None,
        })
    }

    pub fn with_registry(mut self, registry: ParserRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_rules(mut self, rules: RuleEngine) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImportObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Fix "today" for date validation (defaults to the local date at start)
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Start one run; the handle yields outcomes until exactly one terminal
    pub fn start_import(&self, source: ImportSource) -> ImportHandle {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let cancelled = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            rules: Arc::clone(&self.rules),
            ledger: Arc::clone(&self.ledger),
            observer: self.observer.clone(),
            today: self
                .today
                .unwrap_or_else(|| chrono::Local::now().date_naive()),
            cancelled: Arc::clone(&cancelled),
            tx: tx.clone(),
        };

        let spawned = thread::Builder::new()
            .name("import-worker".to_string())
            .spawn(move || worker.run(source));

        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn import worker");
            let outcome = ResultAggregator::new("")
                .failed(ErrorKind::SourceIOFailure, format!("failed to start import: {}", err));
            // Capacity is at least 1 and nothing else has been sent
            if tx.try_send(outcome).is_err() {
                warn!("could not deliver spawn failure");
            }
        }

        ImportHandle { rx, cancelled }
    }

    /// Run to completion and collect every outcome in order
    pub fn run_to_end(&self, source: ImportSource) -> Vec<ImportOutcome> {
        self.start_import(source).collect()
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Caller side of one run
///
/// Iterating blocks the current thread; async callers use [`ImportHandle::recv`].
/// Dropping the handle cancels the run.
pub struct ImportHandle {
    rx: mpsc::Receiver<ImportOutcome>,
    cancelled: Arc<AtomicBool>,
}

impl ImportHandle {
    pub async fn recv(&mut self) -> Option<ImportOutcome> {
        self.rx.recv().await
    }

    /// Stop between two rows; the run ends with `Failed(Cancelled)`
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancel from another thread or while iterating
    pub fn canceller(&self) -> ImportCanceller {
        ImportCanceller(Arc::clone(&self.cancelled))
    }
}

impl Iterator for ImportHandle {
    type Item = ImportOutcome;

    fn next(&mut self) -> Option<ImportOutcome> {
        self.rx.blocking_recv()
    }
}

impl Drop for ImportHandle {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ImportCanceller(Arc<AtomicBool>);

impl ImportCanceller {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// One attempt: owns the row stream and updates the run's counters
pub struct ImportSession<'a> {
    format_id: &'static str,
    rows: Rows<'static>,
    aggregator: &'a mut ResultAggregator,
}

impl<'a> ImportSession<'a> {
    fn open(
        parser: &dyn FormatParser,
        reader: Box<dyn std::io::Read + Send>,
        aggregator: &'a mut ResultAggregator,
    ) -> Self {
        debug!(format = parser.id(), "session opened");
        aggregator.set_bank_label(parser.label());
        ImportSession {
            format_id: parser.id(),
            rows: parser.parse(reader),
            aggregator,
        }
    }

    pub fn processed(&self) -> usize {
        self.aggregator.processed()
    }

    /// Release the source; counters stay with the run
    fn close(self) {
        let ImportSession {
            format_id,
            rows,
            aggregator,
        } = self;
        drop(rows);
        debug!(format = format_id, processed = aggregator.processed(), "session closed");
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// The consumer dropped its handle; nothing more can be delivered
struct ConsumerGone;

struct Worker {
    config: Arc<ImportConfig>,
    registry: Arc<ParserRegistry>,
    rules: Arc<RuleEngine>,
    ledger: Arc<dyn Ledger>,
    observer: Option<Arc<dyn ImportObserver>>,
    today: NaiveDate,
    cancelled: Arc<AtomicBool>,
    tx: mpsc::Sender<ImportOutcome>,
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Worker {
    fn run(self, source: ImportSource) {
        let span = tracing::info_span!("import", source = %source.display_name());
        let _enter = span.enter();
        info!("import started");

        let mut aggregator = ResultAggregator::new("");
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(source, &mut aggregator)
        }));

        let terminal = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(ConsumerGone)) => {
                info!("consumer gone, import abandoned");
                return;
            }
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                error!(detail = %detail, "import worker panicked");
                aggregator.failed(ErrorKind::Internal, format!("import aborted: {}", detail))
            }
        };

        match &terminal {
            ImportOutcome::Completed { summary } => info!(
                imported = summary.imported_count,
                skipped = summary.skipped_count,
                failed = summary.failed_count,
                duplicates = summary.duplicate_count,
                "import completed"
            ),
            ImportOutcome::Failed {
                error_kind, detail, ..
            } => warn!(kind = %error_kind, detail = %detail, "import failed"),
            _ => {}
        }

        let delivered = panic::catch_unwind(AssertUnwindSafe(|| self.emit(terminal.clone())));
        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(ConsumerGone)) => debug!("consumer gone before terminal outcome"),
            Err(_) => {
                // Observer broke on the terminal; the caller still gets it
                warn!("observer panicked on terminal outcome");
                if self.tx.blocking_send(terminal).is_err() {
                    debug!("consumer gone before terminal outcome");
                }
            }
        }
    }

    fn emit(&self, outcome: ImportOutcome) -> Result<(), ConsumerGone> {
        if let Some(observer) = &self.observer {
            observer.on_outcome(&outcome);
        }
        self.tx.blocking_send(outcome).map_err(|_| ConsumerGone)
    }

    fn flush(&self, pending: &mut Option<ImportOutcome>) -> Result<(), ConsumerGone> {
        match pending.take() {
            Some(progress) => self.emit(progress),
            None => Ok(()),
        }
    }

    fn transition(&self, state: &mut ImportState, next: ImportState) {
        debug!(from = %state, to = %next, "state");
        *state = next;
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Everything up to the terminal outcome, which is returned unsent so the
    /// session is already closed when the caller sees it
    fn execute(
        &self,
        source: ImportSource,
        aggregator: &mut ResultAggregator,
    ) -> Result<ImportOutcome, ConsumerGone> {
        let mut state = ImportState::Idle;
        self.transition(&mut state, ImportState::Detecting);

        let (reader, file_name, _mime) = source.into_parts();
        let detector = FormatDetector::new(&self.registry, self.config.peek_bytes);
        let detection = match detector.detect(reader, file_name.as_deref()) {
            Ok(detection) => detection,
            Err(err) => {
                self.transition(&mut state, ImportState::Failed);
                return Ok(aggregator.failed(err.kind(), err.to_string()));
            }
        };
        let parser = detection.parser;
        info!(format = parser.id(), tier = %detection.tier, "format detected");

        let mapper = match RowMapper::new(
            parser.id(),
            parser.label(),
            &self.config,
            Arc::clone(&self.rules),
            self.today,
        ) {
            Ok(mapper) => mapper,
            Err(err) => {
                self.transition(&mut state, ImportState::Failed);
                aggregator.set_bank_label(parser.label());
                return Ok(aggregator.failed(ErrorKind::Unrecognized, err.to_string()));
            }
        };
        let dedup = Deduplicator::new(self.config.fallback_dedup);

        let mut session = ImportSession::open(parser, detection.reader, aggregator);
        self.transition(&mut state, ImportState::Parsing);

        // Held back one row: the last row's count is carried by the final total
        let mut pending: Option<ImportOutcome> = None;

        loop {
            if self.is_cancelled() {
                self.flush(&mut pending)?;
                let processed = session.processed();
                session.close();
                self.transition(&mut state, ImportState::Failed);
                return Ok(aggregator.failed(
                    ErrorKind::Cancelled,
                    format!("cancelled after {} rows", processed),
                ));
            }

            let Some(item) = session.rows.next() else {
                break;
            };
            self.flush(&mut pending)?;

            let outcome = match item {
                Err(err) if err.is_io() => {
                    session.close();
                    self.transition(&mut state, ImportState::Failed);
                    return Ok(aggregator.failed(ErrorKind::SourceIOFailure, err.to_string()));
                }
                Err(err) => {
                    debug!(error = %err, "row could not be parsed");
                    Some(
                        session
                            .aggregator
                            .record_parse_failure(err.row_index(), err.to_string()),
                    )
                }
                Ok(row) => {
                    self.transition(&mut state, ImportState::PersistingRow);
                    let result = self.process_row(&mapper, &dedup, session.aggregator, row);
                    self.transition(&mut state, ImportState::Parsing);
                    match result {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            session.close();
                            self.transition(&mut state, ImportState::Failed);
                            return Ok(aggregator.failed(err.kind(), err.to_string()));
                        }
                    }
                }
            };

            if let Some(outcome) = outcome {
                self.emit(outcome)?;
            }

            let processed = session.processed();
            if processed % self.config.progress_every == 0 {
                pending = Some(ImportOutcome::Progress {
                    processed,
                    total: None,
                    message: format!("{} rows processed", processed),
                });
            }
        }

        self.transition(&mut state, ImportState::Summarizing);
        session.close();
        let total = aggregator.processed();
        self.emit(ImportOutcome::Progress {
            processed: total,
            total: Some(total),
            message: format!("finished reading {} rows", total),
        })?;

        self.transition(&mut state, ImportState::Completed);
        Ok(aggregator.completed())
    }

    /// `Ok(None)` when the row was persisted; an error ends the run
    fn process_row(
        &self,
        mapper: &RowMapper,
        dedup: &Deduplicator,
        aggregator: &mut ResultAggregator,
        row: RawRow,
    ) -> Result<Option<ImportOutcome>, ImportError> {
        if let Some(reason) = row.skip_reason.clone() {
            debug!(row = row.row_index, %reason, "non-transaction row");
            return Ok(Some(aggregator.record_skipped(row.row_index, reason)));
        }

        let record = match mapper.map(&row) {
            Ok(record) => record,
            Err(err) => {
                debug!(row = row.row_index, error = %err, line = %row.raw_line, "row rejected");
                return Ok(Some(aggregator.record_invalid(
                    row.row_index,
                    err.kind(),
                    err.to_string(),
                )));
            }
        };

        if let Some(reason) = dedup
            .is_duplicate(&record, self.ledger.as_ref())
            .map_err(ImportError::LedgerRead)?
        {
            debug!(row = row.row_index, %reason, "duplicate");
            return Ok(Some(aggregator.record_duplicate(row.row_index, reason.to_string())));
        }

        if !aggregator.fits_total(&record.amount) {
            debug!(row = row.row_index, amount = %record.amount, "amount overflows running total");
            return Ok(Some(aggregator.record_invalid(
                row.row_index,
                ErrorKind::BadAmount,
                format!("amount {} would overflow the running total", record.amount),
            )));
        }

        let amount = record.amount.clone();
        match self.ledger.append(record) {
            Ok(id) => {
                debug!(row = row.row_index, id = %id.0, "record persisted");
                aggregator.record_imported(&amount);
                Ok(None)
            }
            // Lost a race with another writer: same key already stored
            Err(LedgerError::Conflict(key)) => Ok(Some(aggregator.record_duplicate(
                row.row_index,
                format!("duplicate: external key {} already imported", key),
            ))),
            Err(err) => Err(ImportError::LedgerWrite(err)),
        }
    }
}
