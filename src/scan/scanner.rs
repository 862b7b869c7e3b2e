//! Delimited text scanner
//!
//! Splits input into rows and fields and writes each field into its slot,
//! using the generated routine for the slot when there is one and the
//! interpreted path otherwise. Each [`RowBatch`] owns its tuples and the
//! pool that backs copied strings, and borrows the input so that string
//! slots aliasing it stay valid.

use super::cache::WriteSlotCache;
use crate::compile::WriteSlotFn;
use crate::descriptor::{SlotDescriptor, SlotId, TupleDescriptor};
use crate::runtime::MemPool;
use crate::text_converter::{EscapeConfig, TextConverter};
use crate::tuple::{Datum, TupleBuffer};
use crate::types::PrimitiveType;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// A field that could not be written into its slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Zero-based row number within the scanned input
    pub row: usize,
    pub column: usize,
    pub slot: SlotId,
    pub ty: PrimitiveType,
    /// Field text, lossily decoded
    pub text: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {} column {}: '{}' is not a valid {}",
            self.row, self.column, self.text, self.ty
        )
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Parse error at {0}")]
    Parse(FieldError),
    #[error("Scan worker panicked")]
    WorkerPanicked,
}

/// Scanner settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub field_delim: u8,
    pub line_delim: u8,
    pub escape: EscapeConfig,
    /// Copy string fields into the batch pool instead of aliasing the input
    pub copy_strings: bool,
    /// Stop at the first field that fails to parse
    pub abort_on_error: bool,
    /// Use generated write-slot routines where available
    pub use_codegen: bool,
    /// Per batch
    pub max_recorded_errors: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            field_delim: b',',
            line_delim: b'\n',
            escape: EscapeConfig::none(),
            copy_strings: false,
            abort_on_error: false,
            use_codegen: true,
            max_recorded_errors: 100,
        }
    }
}

/// Counters for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub rows: usize,
    pub fields: usize,
    pub nulls: usize,
    pub parse_errors: usize,
    pub generated_writes: usize,
    pub interpreted_writes: usize,
    pub scan_time_ns: u64,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.rows += other.rows;
        self.fields += other.fields;
        self.nulls += other.nulls;
        self.parse_errors += other.parse_errors;
        self.generated_writes += other.generated_writes;
        self.interpreted_writes += other.interpreted_writes;
        self.scan_time_ns = self.scan_time_ns.max(other.scan_time_ns);
    }
}

/// Rows produced from one stretch of input
pub struct RowBatch<'a> {
    desc: Arc<TupleDescriptor>,
    tuples: Vec<TupleBuffer>,
    pool: MemPool,
    stats: ScanStats,
    errors: Vec<FieldError>,
    _input: PhantomData<&'a [u8]>,
}

impl<'a> RowBatch<'a> {
    fn new(desc: Arc<TupleDescriptor>) -> Self {
        Self {
            desc,
            tuples: Vec::new(),
            pool: MemPool::new(),
            stats: ScanStats::default(),
            errors: Vec::new(),
            _input: PhantomData,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn descriptor(&self) -> &TupleDescriptor {
        &self.desc
    }

    pub fn tuple(&self, row: usize) -> Option<&TupleBuffer> {
        self.tuples.get(row)
    }

    /// Value of slot `slot` (an index into the descriptor's slots) in `row`
    pub fn datum(&self, row: usize, slot: usize) -> Option<Datum<'_>> {
        let tuple = self.tuples.get(row)?;
        let slot = self.desc.slots().get(slot)?;
        // String slots point into the input (borrowed for 'a) or into
        // `self.pool`, both of which outlive the returned datum.
        Some(unsafe { tuple.datum(slot) })
    }

    /// Row as a JSON array in column order
    pub fn row_json(&self, row: usize) -> Option<JsonValue> {
        let tuple = self.tuples.get(row)?;
        let mut slots: Vec<&SlotDescriptor> = self.desc.slots().iter().collect();
        slots.sort_by_key(|s| s.col_pos());
        let values = slots
            .into_iter()
            .map(|slot| unsafe { tuple.datum(slot) }.to_json())
            .collect();
        Some(JsonValue::Array(values))
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn pool(&self) -> &MemPool {
        &self.pool
    }
}

/// One field of a row, with whether it contains escape bytes
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSpan {
    range: Range<usize>,
    escaped: bool,
}

/// Scans delimited text into tuples of one layout
pub struct TextScanner {
    desc: Arc<TupleDescriptor>,
    config: ScanConfig,
    converter: TextConverter,
    /// Generated routine per slot, by slot index
    writers: Vec<Option<Arc<WriteSlotFn>>>,
    /// Slot index per column
    columns: Vec<Option<usize>>,
}

impl TextScanner {
    pub fn new(desc: Arc<TupleDescriptor>, config: ScanConfig, cache: &WriteSlotCache) -> Self {
        let converter = TextConverter::new(config.escape);
        let writers = desc
            .slots()
            .iter()
            .map(|slot| {
                // Copied strings need the pool, which generated code never touches.
                if !config.use_codegen || (config.copy_strings && slot.ty().is_string()) {
                    return None;
                }
                cache.get_or_generate(&converter, &desc, slot)
            })
            .collect::<Vec<_>>();

        let num_columns = desc.slots().iter().map(|s| s.col_pos() + 1).max().unwrap_or(0);
        let mut columns = vec![None; num_columns];
        for (idx, slot) in desc.slots().iter().enumerate() {
            columns[slot.col_pos()] = Some(idx);
        }

        let generated = writers.iter().filter(|w| w.is_some()).count();
        debug!(
            tuple = desc.id().0,
            slots = desc.slots().len(),
            generated,
            "text scanner ready"
        );
        Self {
            desc,
            config,
            converter,
            writers,
            columns,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &Arc<TupleDescriptor> {
        &self.desc
    }

    /// Whether slot `idx` is written by a generated routine
    pub fn is_generated(&self, idx: usize) -> bool {
        self.writers.get(idx).is_some_and(|w| w.is_some())
    }

    /// Scan all of `input` into one batch
    pub fn scan<'a>(&self, input: &'a [u8]) -> Result<RowBatch<'a>, ScanError> {
        let lines = self.split_lines(input);
        self.scan_lines(input, &lines, 0)
    }

    /// Scan `input` on `workers` threads, one batch per worker, in input
    /// order
    pub fn scan_parallel<'a>(
        &self,
        input: &'a [u8],
        workers: usize,
    ) -> Result<Vec<RowBatch<'a>>, ScanError> {
        let lines = self.split_lines(input);
        let workers = workers.max(1);
        if workers == 1 || lines.len() < 2 {
            return Ok(vec![self.scan_lines(input, &lines, 0)?]);
        }
        let per_worker = lines.len().div_ceil(workers);

        let results = crossbeam::scope(|s| {
            let handles: Vec<_> = lines
                .chunks(per_worker)
                .enumerate()
                .map(|(i, chunk)| {
                    s.spawn(move |_| self.scan_lines(input, chunk, i * per_worker))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| ScanError::WorkerPanicked))
                .collect::<Vec<_>>()
        })
        .map_err(|_| ScanError::WorkerPanicked)?;

        results.into_iter().map(|r| r.and_then(|b| b)).collect()
    }

    fn scan_lines<'a>(
        &self,
        input: &'a [u8],
        lines: &[Range<usize>],
        first_row: usize,
    ) -> Result<RowBatch<'a>, ScanError> {
        let start = Instant::now();
        let mut batch = RowBatch::new(Arc::clone(&self.desc));
        batch.tuples.reserve(lines.len());

        for (i, line) in lines.iter().enumerate() {
            let mut tuple = TupleBuffer::for_descriptor(&self.desc);
            self.scan_row(
                &input[line.clone()],
                first_row + i,
                &mut tuple,
                &mut batch,
            )?;
            batch.tuples.push(tuple);
            batch.stats.rows += 1;
        }

        batch.stats.scan_time_ns = start.elapsed().as_nanos() as u64;
        debug!(
            rows = batch.stats.rows,
            parse_errors = batch.stats.parse_errors,
            generated = batch.stats.generated_writes,
            interpreted = batch.stats.interpreted_writes,
            "scanned batch"
        );
        Ok(batch)
    }

    fn scan_row<'a>(
        &self,
        line: &'a [u8],
        row: usize,
        tuple: &mut TupleBuffer,
        batch: &mut RowBatch<'a>,
    ) -> Result<(), ScanError> {
        tuple.init();
        let fields = self.split_fields(line);

        for (column, slot_idx) in self.columns.iter().enumerate() {
            let Some(slot_idx) = *slot_idx else {
                continue;
            };
            let slot = &self.desc.slots()[slot_idx];
            let (data, escaped) = match fields.get(column) {
                Some(f) => (&line[f.range.clone()], f.escaped),
                None => (&line[..0], false),
            };
            batch.stats.fields += 1;

            let need_escape = escaped && slot.ty().is_string();
            let ok = match &self.writers[slot_idx] {
                Some(routine) if !need_escape => {
                    batch.stats.generated_writes += 1;
                    routine.write(tuple, data)
                }
                _ => {
                    batch.stats.interpreted_writes += 1;
                    self.converter.write_slot(
                        slot,
                        tuple,
                        data,
                        self.config.copy_strings,
                        need_escape,
                        &batch.pool,
                    )
                }
            };
            if tuple.is_null(slot) {
                batch.stats.nulls += 1;
            }
            if !ok {
                let error = FieldError {
                    row,
                    column,
                    slot: slot.id(),
                    ty: slot.ty(),
                    text: String::from_utf8_lossy(data).into_owned(),
                };
                batch.stats.parse_errors += 1;
                if self.config.abort_on_error {
                    return Err(ScanError::Parse(error));
                }
                if batch.errors.len() < self.config.max_recorded_errors {
                    warn!(%error, "field conversion failed");
                    batch.errors.push(error);
                }
            }
        }
        Ok(())
    }

    /// Line ranges, honouring escaped line delimiters. A trailing delimiter
    /// does not start an extra empty row.
    fn split_lines(&self, input: &[u8]) -> Vec<Range<usize>> {
        let mut lines = Vec::new();
        let mut start = 0;
        for (pos, _) in self.delimiters(input, self.config.line_delim) {
            lines.push(start..pos);
            start = pos + 1;
        }
        if start < input.len() {
            lines.push(start..input.len());
        }
        lines
    }

    /// Field ranges of one line
    fn split_fields(&self, line: &[u8]) -> Vec<FieldSpan> {
        let mut fields = Vec::new();
        let mut start = 0;
        for (pos, escaped) in self.delimiters(line, self.config.field_delim) {
            fields.push(FieldSpan {
                range: start..pos,
                escaped,
            });
            start = pos + 1;
        }
        let escaped = self
            .config
            .escape
            .escape_byte()
            .is_some_and(|e| line[start..].contains(&e));
        fields.push(FieldSpan {
            range: start..line.len(),
            escaped,
        });
        fields
    }

    /// Positions of unescaped `delim` bytes, each with whether an escape
    /// byte was seen since the previous delimiter
    fn delimiters<'b>(&self, data: &'b [u8], delim: u8) -> impl Iterator<Item = (usize, bool)> + 'b {
        let escape = self.config.escape.escape_byte();
        let mut escape_next = false;
        let mut saw_escape = false;
        data.iter().enumerate().filter_map(move |(pos, &b)| {
            if Some(b) == escape {
                escape_next = !escape_next;
                saw_escape = true;
                return None;
            }
            let is_delim = b == delim && !escape_next;
            escape_next = false;
            if is_delim {
                let seen = saw_escape;
                saw_escape = false;
                Some((pos, seen))
            } else {
                None
            }
        })
    }
}
