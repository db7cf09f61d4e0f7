//! The two-stage parallel duplicate-marking engine.
//!
//! Stage 1 (scan) walks every shard once, counting coverage and publishing
//! distant-mate tables to the rendezvous registry. Stage 2 (mark) walks the
//! shards again: classification, bagging, primary selection, optical
//! detection, and subsampling all happen shard-locally, with mate metadata
//! taken from the registry when a pair crosses a shard boundary. Completed
//! shards are reordered into planner order before they reach the sink, so
//! output order equals input order.
//!
//! Workers run on a bounded FIFO queue; the only blocking points are the
//! queue itself and the rendezvous waits, and the scan stage publishes every
//! table before any marking worker can ask for one, so the waits cannot
//! starve the pool.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use crossbeam_channel::bounded;
use log::{info, warn};
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::Flags;
use parking_lot::Mutex;

use crate::bags::{Bagger, UmiPolicy};
use crate::coverage::{CoverageCounts, CoverageMap, high_coverage_intervals};
use crate::errors::{MarkdupsError, Result};
use crate::key::{DuplicateKey, KeySide, Strand, duplex_strand};
use crate::logging::OperationTimer;
use crate::mates::{MateInfo, RendezvousRegistry, ShardMateState};
use crate::metrics::MetricsCollection;
use crate::optical::{find_optical_duplicates, parse_physical_location};
use crate::opts::Opts;
use crate::progress::ProgressTracker;
use crate::provider::{Provider, RecordSink};
use crate::record_utils::{
    LibraryLookup, alignment_start, base_quality_score, build_library_lookup, is_coordinate_sorted,
    library_of, mate_alignment_start, read_name, unclipped_five_prime,
};
use crate::reorder_buffer::ReorderBuffer;
use crate::shard::{Shard, ShardPlan};
use crate::umi::UmiIndex;

/// Duplicate flag bit in SAM flags (0x400)
const DUPLICATE_FLAG: u16 = 0x400;

/// The duplicate-marking engine over a record provider.
pub struct MarkDuplicates<'a, P: Provider> {
    provider: &'a P,
    opts: Opts,
}

/// Everything shared across workers for one run.
struct RunState {
    plan: ShardPlan,
    lookup: LibraryLookup,
    umi_policy: UmiPolicy,
    registry: RendezvousRegistry,
    metrics: Mutex<MetricsCollection>,
    coverage: Mutex<AHashMap<usize, Vec<u32>>>,
    errors: Mutex<Vec<MarkdupsError>>,
    progress: ProgressTracker,
}

impl RunState {
    fn fail(&self, error: MarkdupsError) {
        self.registry.cancel();
        self.errors.lock().push(error);
    }

    /// The error that decides the run's result: the first non-cancellation
    /// worker error wins, with `Cancelled` as the fallback.
    fn into_result(self) -> Result<MetricsCollection> {
        let mut errors = self.errors.into_inner();
        if let Some(index) =
            errors.iter().position(|e| !matches!(e, MarkdupsError::Cancelled))
        {
            return Err(errors.swap_remove(index));
        }
        if let Some(error) = errors.pop() {
            return Err(error);
        }
        if self.registry.is_cancelled() {
            return Err(MarkdupsError::Cancelled);
        }
        Ok(self.metrics.into_inner())
    }
}

impl<'a, P: Provider> MarkDuplicates<'a, P> {
    /// Validate options and bind the engine to a provider.
    pub fn new(provider: &'a P, opts: &Opts) -> Result<Self> {
        let mut opts = opts.clone();
        opts.validate()?;
        Ok(Self { provider, opts })
    }

    /// Run duplicate marking, writing flagged records to `sink`.
    ///
    /// Returns the merged run metrics. A failing worker cancels the run;
    /// the remaining workers observe cancellation at shard boundaries and at
    /// rendezvous waits, and the first non-cancellation error becomes the
    /// run's result.
    pub fn mark(&self, sink: &mut dyn RecordSink) -> Result<MetricsCollection> {
        let header = self.provider.header();
        if !is_coordinate_sorted(header) {
            return Err(MarkdupsError::config("input is not coordinate-sorted"));
        }

        let umi_policy = self.build_umi_policy()?;
        let state = RunState {
            plan: ShardPlan::new(header, self.opts.shard_size, self.opts.padding)?,
            lookup: build_library_lookup(header),
            umi_policy,
            registry: RendezvousRegistry::new(),
            metrics: Mutex::new(MetricsCollection::new()),
            coverage: Mutex::new(AHashMap::new()),
            errors: Mutex::new(Vec::new()),
            progress: ProgressTracker::new("Marked records"),
        };

        let timer = OperationTimer::new("Marking duplicates");
        info!(
            "Planned {} shards of {} bases with padding {}",
            state.plan.num_shards(),
            self.opts.shard_size,
            self.opts.padding
        );

        self.run_scan_stage(&state);

        let coverage_map = if self.opts.coverage_max > 0 && !state.registry.is_cancelled() {
            let coverage = state.coverage.lock();
            let intervals = high_coverage_intervals(&coverage, self.opts.coverage_max);
            info!("Found {} high-coverage intervals", intervals.len());
            state.metrics.lock().high_coverage_intervals.extend(intervals.iter().copied());
            CoverageMap::new(&intervals)
        } else {
            CoverageMap::default()
        };

        self.run_mark_stage(&state, &coverage_map, sink);

        if !state.registry.is_cancelled() {
            if let Err(error) = self.emit_unmapped(&state, sink) {
                state.fail(error);
            }
        }
        if !state.registry.is_cancelled() {
            if let Err(error) = sink.close() {
                state.fail(error);
            }
        }

        timer.log_completion(state.progress.count());
        state.into_result()
    }

    fn build_umi_policy(&self) -> Result<UmiPolicy> {
        if !self.opts.use_umis {
            return Ok(UmiPolicy::default());
        }
        let index = match &self.opts.umi_file {
            Some(path) => Some(UmiIndex::from_file(path, self.opts.scavenge_umis)?),
            None => None,
        };
        Ok(UmiPolicy { enabled: true, index, radius: self.opts.scavenge_umis })
    }

    /// Stage 1: coverage pass and mate-table publication, all shards.
    fn run_scan_stage(&self, state: &RunState) {
        let num_shards = state.plan.num_shards();
        let (task_tx, task_rx) = bounded::<u64>(self.opts.queue_length.max(1));

        std::thread::scope(|scope| {
            scope.spawn(move || {
                for index in 0..num_shards {
                    if task_tx.send(index).is_err() {
                        break;
                    }
                }
            });

            for _ in 0..self.opts.effective_parallelism() {
                let task_rx = task_rx.clone();
                scope.spawn(move || {
                    while let Ok(index) = task_rx.recv() {
                        if state.registry.is_cancelled() {
                            break;
                        }
                        if let Err(error) = self.scan_shard(state, index) {
                            state.fail(error);
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
        });
    }

    fn scan_shard(&self, state: &RunState, shard_index: u64) -> Result<()> {
        let shard = state.plan.shard(shard_index);
        let mut mates = ShardMateState::new();
        let mut coverage =
            (self.opts.coverage_max > 0).then(CoverageCounts::new);

        for record in self.provider.iter_shard(&shard)? {
            if let Some(coverage) = &mut coverage {
                coverage.process(&shard, &state.plan, &record);
            }

            let flags = record.flags();
            if flags.is_secondary()
                || flags.is_supplementary()
                || flags.is_unmapped()
                || !flags.is_segmented()
                || flags.is_mate_unmapped()
            {
                continue;
            }
            let (Some(ref_id), Some(start)) =
                (record.reference_sequence_id(), alignment_start(&record))
            else {
                continue;
            };
            let (Some(mate_ref), Some(mate_start)) =
                (record.mate_reference_sequence_id(), mate_alignment_start(&record))
            else {
                continue;
            };
            let Some(unclipped) = unclipped_five_prime(&record) else { continue };

            let info = MateInfo {
                ref_id,
                unclipped_5p: unclipped,
                reversed: flags.is_reverse_complemented(),
                score: base_quality_score(&record, self.opts.min_bases),
                flags: u16::from(flags),
            };
            mates.note_pair(
                &state.plan,
                &shard,
                read_name(&record),
                info,
                (ref_id, start),
                (mate_ref, mate_start),
            );
        }

        state.registry.publish(shard_index, mates.exported, mates.consumers);
        if let Some(coverage) = coverage {
            coverage.merge_into(&mut state.coverage.lock());
        }
        Ok(())
    }

    /// Stage 2: classification, marking, and ordered emission, all shards.
    fn run_mark_stage(
        &self,
        state: &RunState,
        coverage_map: &CoverageMap,
        sink: &mut dyn RecordSink,
    ) {
        if state.registry.is_cancelled() {
            return;
        }
        let num_shards = state.plan.num_shards();
        let queue = self.opts.queue_length.max(1);
        let (task_tx, task_rx) = bounded::<u64>(queue);
        let (result_tx, result_rx) = bounded::<(u64, Vec<RecordBuf>)>(queue);

        std::thread::scope(|scope| {
            scope.spawn(move || {
                for index in 0..num_shards {
                    if task_tx.send(index).is_err() {
                        break;
                    }
                }
            });

            for _ in 0..self.opts.effective_parallelism() {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(index) = task_rx.recv() {
                        if state.registry.is_cancelled() {
                            break;
                        }
                        match self.mark_shard(state, coverage_map, index) {
                            Ok(emitted) => {
                                state.progress.add(emitted.len() as u64);
                                if result_tx.send((index, emitted)).is_err() {
                                    break;
                                }
                            }
                            Err(error) => {
                                state.fail(error);
                                break;
                            }
                        }
                    }
                });
            }
            drop(task_rx);
            drop(result_tx);

            // Reorder completed shards into planner order and write them.
            let mut reorder = ReorderBuffer::new();
            let mut failed = false;
            for (index, batch) in &result_rx {
                reorder.insert(index, batch);
                loop {
                    let seq = reorder.next_seq();
                    let Some(batch) = reorder.try_pop_next() else { break };
                    if failed {
                        continue;
                    }
                    for record in &batch {
                        if let Err(error) = sink.write(seq, record) {
                            state.fail(error);
                            failed = true;
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Process one shard end-to-end and return the records it emits.
    fn mark_shard(
        &self,
        state: &RunState,
        coverage_map: &CoverageMap,
        shard_index: u64,
    ) -> Result<Vec<RecordBuf>> {
        let shard = state.plan.shard(shard_index);
        let mut records: Vec<RecordBuf> = self.provider.iter_shard(&shard)?.collect();

        // Re-marking is idempotent: input flags are cleared first.
        for record in &mut records {
            let flags = u16::from(record.flags());
            *record.flags_mut() = Flags::from(flags & !DUPLICATE_FLAG);
        }

        // Index primary mapped records by name for local mate lookups, and
        // collect the publishers whose tables this shard needs.
        let mut by_name: AHashMap<&[u8], Vec<usize>> = AHashMap::new();
        let mut needed: AHashSet<u64> = AHashSet::new();
        for (i, record) in records.iter().enumerate() {
            let flags = record.flags();
            if flags.is_secondary() || flags.is_supplementary() || flags.is_unmapped() {
                continue;
            }
            by_name.entry(read_name(record)).or_default().push(i);

            if !flags.is_segmented() || flags.is_mate_unmapped() {
                continue;
            }
            // Padding records participate in bags too, so their distant
            // mates are consumed like everyone else's.
            if let (Some(mate_ref), Some(mate_start)) =
                (record.mate_reference_sequence_id(), mate_alignment_start(record))
            {
                if !shard.in_padded_window(mate_ref, mate_start) {
                    needed.insert(state.plan.index_at(mate_ref, mate_start));
                }
            }
        }

        let mut tables: AHashMap<u64, Arc<crate::mates::MateTable>> = AHashMap::new();
        for publisher in needed {
            tables.insert(publisher, state.registry.consume(publisher, shard_index)?);
        }

        let mut local = MetricsCollection::new();
        let mut bagger = Bagger::new();
        let mut owned = vec![false; records.len()];

        for (i, record) in records.iter().enumerate() {
            let flags = record.flags();
            let (Some(ref_id), Some(start)) =
                (record.reference_sequence_id(), alignment_start(record))
            else {
                continue;
            };
            owned[i] = shard.owns(ref_id, start);
            let library = library_of(record, &state.lookup);

            if flags.is_secondary() || flags.is_supplementary() {
                if owned[i] {
                    local.get_mut(&library).secondary_supplementary += 1;
                }
                continue;
            }
            if flags.is_unmapped() {
                if owned[i] {
                    local.get_mut(&library).unmapped_reads += 1;
                }
                continue;
            }

            let side = KeySide { ref_id, pos: unclipped_five_prime(record).unwrap_or(start), reversed: flags.is_reverse_complemented() };
            let score = base_quality_score(record, self.opts.min_bases);
            let name = read_name(record);
            let umi = self.umi_of(record);
            let strand = umi.as_deref().map_or(Strand::None, duplex_strand);

            let mate = if flags.is_segmented() && !flags.is_mate_unmapped() {
                self.resolve_mate(state, &shard, &records, &by_name, &tables, i)
            } else {
                None
            };

            match mate {
                Some((mate_side, mate_score)) => {
                    if owned[i] {
                        let metrics = local.get_mut(&library);
                        metrics.read_pairs_examined += 1;
                        if mate_side.ref_id == side.ref_id {
                            local.note_align_dist((side.pos - mate_side.pos).abs());
                        }
                    }
                    let key = DuplicateKey::pair(side, mate_side, strand);
                    bagger.add(key, library, name, umi, score + mate_score, owned[i].then_some(i), true);
                }
                None => {
                    if owned[i] {
                        local.get_mut(&library).unpaired_reads += 1;
                    }
                    let key = DuplicateKey::single(side, strand);
                    bagger.add(key, library, name, umi, score, owned[i].then_some(i), false);
                }
            }
        }

        // Primary selection, duplicate flagging, and optical detection.
        let mut duplicate_indices: Vec<usize> = Vec::new();
        for bag in bagger.into_bags(&state.umi_policy) {
            for entry in &bag.entries[1..] {
                duplicate_indices.extend(&entry.owned);
                let metrics = local.get_mut(&bag.library);
                if entry.is_pair {
                    metrics.read_pair_dups += entry.owned.len() as u64;
                } else {
                    metrics.unpaired_dups += entry.owned.len() as u64;
                }
            }

            // Optical detection runs once per bag, on the shard owning the
            // bag's left coordinate, so split bags are not double-counted.
            let (left_ref, left_pos) = bag.key.left();
            if bag.key.is_single()
                || bag.entries.len() < 2
                || state.plan.index_at(left_ref, left_pos) != shard_index
            {
                continue;
            }
            let locations: Vec<_> = bag
                .entries
                .iter()
                .map(|entry| {
                    let location = parse_physical_location(&entry.name);
                    if location.is_none() {
                        warn!(
                            "cannot parse flowcell coordinates from '{}'; \
                             skipping for optical detection",
                            String::from_utf8_lossy(&entry.name)
                        );
                    }
                    location
                })
                .collect();
            let optical = find_optical_duplicates(&locations, self.opts.optical_distance);
            local.get_mut(&bag.library).read_pair_optical_dups += 2 * optical.count;
            for distance in optical.distances {
                local.add_distance(bag.entries.len(), distance);
            }
        }
        for index in duplicate_indices {
            let flags = u16::from(records[index].flags());
            *records[index].flags_mut() = Flags::from(flags | DUPLICATE_FLAG);
        }

        // Emit owned records in input order, subsampling high-coverage reads.
        let mut emitted = Vec::new();
        for (i, mut record) in records.into_iter().enumerate() {
            if !owned[i] {
                continue;
            }
            if self.opts.coverage_max > 0 {
                if let Some(mean) = coverage_map.record_or_mate_mean(&record) {
                    let keep = f64::from(self.opts.coverage_max) / mean;
                    if !crate::coverage::subsample_keep(self.opts.seed, read_name(&record), keep) {
                        continue;
                    }
                }
            }
            if !self.opts.emit_unmodified_fields {
                strip_auxiliary_fields(&mut record);
            }
            emitted.push(record);
        }

        state.metrics.lock().merge(&local);
        Ok(emitted)
    }

    /// Resolve the mate's key side and score, locally when the mate is
    /// inside the padded window and through the rendezvous otherwise.
    fn resolve_mate(
        &self,
        state: &RunState,
        shard: &Shard,
        records: &[RecordBuf],
        by_name: &AHashMap<&[u8], Vec<usize>>,
        tables: &AHashMap<u64, Arc<crate::mates::MateTable>>,
        index: usize,
    ) -> Option<(KeySide, i64)> {
        let record = &records[index];
        let name = read_name(record);
        let (Some(mate_ref), Some(mate_start)) =
            (record.mate_reference_sequence_id(), mate_alignment_start(record))
        else {
            warn!(
                "paired record '{}' is missing mate coordinates; treating as a single fragment",
                String::from_utf8_lossy(name)
            );
            return None;
        };

        if shard.in_padded_window(mate_ref, mate_start) {
            let partner = by_name
                .get(name)
                .and_then(|indices| indices.iter().find(|&&j| j != index))
                .copied();
            if let Some(partner) = partner {
                let partner = &records[partner];
                if let Some(side) = KeySide::from_record(partner) {
                    return Some((side, base_quality_score(partner, self.opts.min_bases)));
                }
            }
        } else {
            let publisher = state.plan.index_at(mate_ref, mate_start);
            if let Some(info) = tables.get(&publisher).and_then(|t| t.get(name)) {
                return Some((
                    KeySide { ref_id: info.ref_id, pos: info.unclipped_5p, reversed: info.reversed },
                    info.score,
                ));
            }
        }

        warn!(
            "mate of '{}' not found at {}:{}; treating as a single fragment",
            String::from_utf8_lossy(name),
            mate_ref,
            mate_start + 1
        );
        None
    }

    fn umi_of(&self, record: &RecordBuf) -> Option<String> {
        use noodles::sam::alignment::record_buf::data::field::Value as DataValue;
        if !self.opts.use_umis {
            return None;
        }
        match record.data().get(b"RX") {
            Some(DataValue::String(umi)) => {
                Some(String::from_utf8_lossy(umi.as_ref()).to_uppercase())
            }
            _ => None,
        }
    }

    /// Count and pass through the unplaced unmapped tail.
    fn emit_unmapped(&self, state: &RunState, sink: &mut dyn RecordSink) -> Result<()> {
        let index = state.plan.unmapped_index();
        let mut count = 0u64;
        for mut record in self.provider.iter_unplaced_unmapped()? {
            let library = library_of(&record, &state.lookup);
            {
                let mut metrics = state.metrics.lock();
                if record.flags().is_secondary() || record.flags().is_supplementary() {
                    metrics.get_mut(&library).secondary_supplementary += 1;
                } else {
                    metrics.get_mut(&library).unmapped_reads += 1;
                }
            }
            let flags = u16::from(record.flags());
            *record.flags_mut() = Flags::from(flags & !DUPLICATE_FLAG);
            if !self.opts.emit_unmodified_fields {
                strip_auxiliary_fields(&mut record);
            }
            sink.write(index, &record)?;
            count += 1;
        }
        state.progress.add(count);
        Ok(())
    }
}

/// Drop auxiliary data fields, keeping the read group and UMI tags.
fn strip_auxiliary_fields(record: &mut RecordBuf) {
    use noodles::sam::alignment::record::data::field::Tag;

    let keep = [Tag::new(b'R', b'G'), Tag::new(b'R', b'X')];
    let tags: Vec<Tag> =
        record.data().iter().map(|(tag, _)| tag).filter(|tag| !keep.contains(tag)).collect();
    for tag in tags {
        record.data_mut().remove(&tag);
    }
}
