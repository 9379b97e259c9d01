//! TDMA burst scheduler.
//!
//! The scheduler owns per-timeslot bounded queues of pre-encoded bursts
//! keyed by TDMA frame number and serves a pull interface producing exactly
//! one burst per `(fn, tn)` slot, substituting filler bursts when the queue
//! head does not match.  On top of that sit the logical-channel layer
//! (interleaving masks, block cadence, measurement averaging) and the TCH/H
//! and FACCH/H frame mappings.

pub mod lchan;
pub mod meas;
pub mod queue;
pub mod tchh;

use std::cmp::Ordering;

use crate::sched::queue::{BURST_PAYLOAD_LEN, BurstData, BurstQueue, BurstType};

/// TDMA hyperframe length: frame numbers are counted modulo this.
pub const FN_MAX: u32 = 2048 * 26 * 51;

/// Cyclic comparison of two frame numbers: `b` is after `a` when reaching
/// it takes less than half a hyperframe.
pub fn fn_cmp(a: u32, b: u32) -> Ordering {
	if a == b {
		return Ordering::Equal;
	}
	if (b.wrapping_sub(a)) % FN_MAX > FN_MAX / 2 {
		Ordering::Greater
	} else {
		Ordering::Less
	}
}

/// `(a + b) mod FN_MAX`.
pub fn fn_add(a: u32, b: u32) -> u32 {
	(a + b) % FN_MAX
}

/// `(a - b) mod FN_MAX`.
pub fn fn_sub(a: u32, b: u32) -> u32 {
	(a + FN_MAX - b) % FN_MAX
}

/// Number of timeslots per TDMA frame.
pub const TS_COUNT: usize = 8;

/// TDMA clock state.  The L1 indicates frame numbers as they happen; the
/// scheduler must see every frame exactly once, so gaps are detected and
/// counted here.
pub struct TdmaClock {
	fn_: Option<u32>,
	/// Frames lost between indications.
	pub lost: u64,
}

impl TdmaClock {
	pub fn new() -> TdmaClock {
		TdmaClock { fn_: None, lost: 0 }
	}

	pub fn current(&self) -> Option<u32> {
		self.fn_
	}

	pub fn reset(&mut self) {
		self.fn_ = None;
	}

	/// Registers a clock indication for `fn_` and returns how many frames
	/// elapsed since the last one (1 for a well-behaved clock).
	pub fn handle(&mut self, fn_: u32) -> u32 {
		let elapsed = match self.fn_ {
			None => 1,
			Some(prev) => fn_sub(fn_, prev),
		};
		if elapsed > 1 {
			warn!("TDMA clock jumped by {elapsed} frames (fn={fn_})");
			self.lost += u64::from(elapsed) - 1;
		} else if elapsed == 0 {
			warn!("TDMA clock stalled at fn={fn_}");
		}
		self.fn_ = Some(fn_);
		elapsed
	}
}

impl Default for TdmaClock {
	fn default() -> Self {
		TdmaClock::new()
	}
}

/// Queue capacity shared by all timeslots.
const BURST_QUEUE_CAPACITY: usize = 512;

/// Frame-number-indexed burst dispatch with a filler-table fallback.
///
/// Every burst leaving the queue, on time or stale, is copied into the
/// filler table, so the filler always replays the last observed content of
/// the respective frame position.
pub struct BurstScheduler {
	bq: BurstQueue,
	fill: [[BurstData; 52]; TS_COUNT],
	fill_size: [u8; TS_COUNT],
	/// Stale bursts discarded at pull time.
	pub stale: u64,
}

impl BurstScheduler {
	pub fn new() -> BurstScheduler {
		BurstScheduler {
			bq: BurstQueue::new(TS_COUNT, BURST_QUEUE_CAPACITY),
			fill: [[BurstData::DUMMY; 52]; TS_COUNT],
			fill_size: [52; TS_COUNT],
			stale: 0,
		}
	}

	/// (Re)initializes the filler track of one timeslot for its channel
	/// combination: BCCH-carrying timeslots (types 4 and 5) replay the
	/// 51-frame FCCH/SCH pattern, types 6 and 7 a 51-frame dummy pattern,
	/// everything else a 52-frame dummy pattern.
	pub fn init_filler(&mut self, tn: usize, ts_type: u8) {
		match ts_type >> 1 {
			2 => {
				for i in 0..51 {
					self.fill[tn][i] = if i == 50 {
						BurstData::DUMMY
					} else if i % 10 == 0 {
						BurstData::fb()
					} else if i % 10 == 1 {
						BurstData::sb()
					} else {
						BurstData::DUMMY
					};
				}
				self.fill_size[tn] = 51;
			}
			3 => {
				self.fill[tn][..51].fill(BurstData::DUMMY);
				self.fill_size[tn] = 51;
			}
			_ => {
				self.fill[tn].fill(BurstData::DUMMY);
				self.fill_size[tn] = 52;
			}
		}
	}

	pub fn reset(&mut self) {
		self.bq.reset();
	}

	/// Queues a burst for transmission at `(fn, tn)`.  Fails when the
	/// shared arena is full; the caller drops the burst.
	pub fn put_burst(
		&mut self,
		fn_: u32,
		tn: usize,
		btype: BurstType,
		data: &[u8; BURST_PAYLOAD_LEN],
	) -> Result<(), queue::QueueFull> {
		let slot = self.bq.push(tn, fn_)?;
		slot.btype = btype;
		if btype == BurstType::Nb {
			slot.data = *data;
		}
		Ok(())
	}

	/// Produces the burst to transmit at `(fn, tn)`.  A queued burst for an
	/// earlier frame number is discarded into the filler table; with no
	/// exact match the filler content for this frame position is replayed.
	pub fn get_burst(&mut self, fn_: u32, tn: usize) -> BurstData {
		let fill = &mut self.fill;
		let fill_size = &self.fill_size;
		let stale = &mut self.stale;

		let burst = self.bq.pop_head(tn, fn_, |burst, head, stale_fn| {
			trace!("stale burst for fn={stale_fn} tn={head}");
			*stale += 1;
			fill[head][(stale_fn % u32::from(fill_size[head])) as usize] = *burst;
		});

		let period = u32::from(self.fill_size[tn]);
		match burst {
			Some(burst) => {
				// Fresh burst: track it in the filler table and use it.
				self.fill[tn][(fn_ % period) as usize] = burst;
				burst
			}
			None => self.fill[tn][(fn_ % period) as usize],
		}
	}
}

impl Default for BurstScheduler {
	fn default() -> Self {
		BurstScheduler::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cyclic_fn_compare() {
		assert_eq!(fn_cmp(100, 100), Ordering::Equal);
		assert_eq!(fn_cmp(100, 101), Ordering::Less);
		assert_eq!(fn_cmp(101, 100), Ordering::Greater);
		// 0 is "after" the hyperframe maximum.
		assert_eq!(fn_cmp(FN_MAX - 1, 0), Ordering::Less);
		assert_eq!(fn_cmp(0, FN_MAX - 1), Ordering::Greater);
	}

	#[test]
	fn fn_arithmetic_wraps() {
		assert_eq!(fn_add(FN_MAX - 1, 2), 1);
		assert_eq!(fn_sub(1, 2), FN_MAX - 1);
	}

	#[test]
	fn clock_gap_detection() {
		let mut clck = TdmaClock::new();
		assert_eq!(clck.handle(100), 1);
		assert_eq!(clck.handle(101), 1);
		// Three frames lost.
		assert_eq!(clck.handle(105), 4);
		assert_eq!(clck.lost, 3);
		// Hyperframe wrap is not a gap.
		clck.reset();
		clck.handle(FN_MAX - 1);
		assert_eq!(clck.handle(0), 1);
	}

	#[test]
	fn pull_with_filler_fallback() {
		let mut sched = BurstScheduler::new();
		sched.init_filler(2, 0);

		let payload = [0x2b; BURST_PAYLOAD_LEN];
		sched.put_burst(100, 2, BurstType::Nb, &payload).unwrap();

		// Too early: the filler for 99 % 52 is replayed.
		let burst = sched.get_burst(99, 2);
		assert_eq!(burst.btype, BurstType::Dummy);

		// Exact match: the queued burst, also written to the filler.
		let burst = sched.get_burst(100, 2);
		assert_eq!(burst.btype, BurstType::Nb);
		assert_eq!(burst.data, payload);

		// Queue is now empty, but 100 % 52 repeats from the filler track.
		let burst = sched.get_burst(100 % 52 + 52 * 3, 2);
		assert_eq!(burst.btype, BurstType::Nb);
		assert_eq!(burst.data, payload);
	}

	#[test]
	fn stale_bursts_feed_the_filler() {
		let mut sched = BurstScheduler::new();
		sched.init_filler(0, 0);

		let payload = [0x55; BURST_PAYLOAD_LEN];
		sched.put_burst(10, 0, BurstType::Nb, &payload).unwrap();

		// Pulling a later frame discards the stale burst into the filler.
		let burst = sched.get_burst(20, 0);
		assert_eq!(burst.btype, BurstType::Dummy);
		assert_eq!(sched.stale, 1);

		let burst = sched.get_burst(10 + 52, 0);
		assert_eq!(burst.btype, BurstType::Nb);
		assert_eq!(burst.data, payload);
	}

	#[test]
	fn bcch_filler_pattern() {
		let mut sched = BurstScheduler::new();
		sched.init_filler(0, 4);

		assert_eq!(sched.get_burst(0, 0).btype, BurstType::Fb);
		assert_eq!(sched.get_burst(1, 0).btype, BurstType::Sb);
		assert_eq!(sched.get_burst(2, 0).btype, BurstType::Dummy);
		assert_eq!(sched.get_burst(10, 0).btype, BurstType::Fb);
		assert_eq!(sched.get_burst(11, 0).btype, BurstType::Sb);
		assert_eq!(sched.get_burst(50, 0).btype, BurstType::Dummy);
		// 51-frame period on BCCH timeslots.
		assert_eq!(sched.get_burst(51, 0).btype, BurstType::Fb);
	}
}
