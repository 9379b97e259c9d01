//! Deadline-ordered timer wheel.
//!
//! Timers are `(deadline, owner key)` pairs in a binary heap.  Cancellation
//! does not remove the heap entry; it drops the token from the live map and
//! the stale entry is skipped when it surfaces.  All protocol timers (NS
//! alive/test, SMC TC1*, SMR TR1N/TR2N) run on wheels of this type, driven
//! from the single event loop.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::HashMap;

/// Handle to a scheduled timer, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerToken(u64);

pub struct TimerWheel<K> {
	heap: BinaryHeap<Reverse<(Instant, u64)>>,
	live: HashMap<u64, K, RandomState>,
	next_token: u64,
}

impl<K> TimerWheel<K> {
	pub fn new() -> TimerWheel<K> {
		TimerWheel {
			heap: BinaryHeap::new(),
			live: HashMap::with_hasher(RandomState::new()),
			next_token: 0,
		}
	}

	/// Schedules `key` to fire at `deadline`.
	pub fn schedule_at(&mut self, deadline: Instant, key: K) -> TimerToken {
		let token = self.next_token;
		self.next_token += 1;
		self.heap.push(Reverse((deadline, token)));
		self.live.insert(token, key);
		TimerToken(token)
	}

	/// Schedules `key` to fire `delay` from now.
	pub fn schedule(&mut self, delay: Duration, key: K) -> TimerToken {
		self.schedule_at(Instant::now() + delay, key)
	}

	/// Cancels a timer.  Cancelling an already-fired or already-cancelled
	/// token is a no-op.
	pub fn cancel(&mut self, token: TimerToken) {
		self.live.remove(&token.0);
	}

	pub fn is_pending(&self, token: TimerToken) -> bool {
		self.live.contains_key(&token.0)
	}

	/// Earliest live deadline, for the selector timeout.
	pub fn next_deadline(&mut self) -> Option<Instant> {
		while let Some(&Reverse((deadline, token))) = self.heap.peek() {
			if self.live.contains_key(&token) {
				return Some(deadline);
			}
			self.heap.pop();
		}
		None
	}

	/// Pops every timer whose deadline has passed, in firing order.
	pub fn expired(&mut self, now: Instant) -> Vec<K> {
		let mut fired = Vec::new();
		while let Some(&Reverse((deadline, token))) = self.heap.peek() {
			if deadline > now {
				break;
			}
			self.heap.pop();
			if let Some(key) = self.live.remove(&token) {
				fired.push(key);
			}
		}
		fired
	}

	pub fn pending(&self) -> usize {
		self.live.len()
	}
}

impl<K> Default for TimerWheel<K> {
	fn default() -> Self {
		TimerWheel::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fires_in_deadline_order() {
		let mut wheel = TimerWheel::new();
		let now = Instant::now();
		wheel.schedule_at(now + Duration::from_secs(3), "c");
		wheel.schedule_at(now + Duration::from_secs(1), "a");
		wheel.schedule_at(now + Duration::from_secs(2), "b");

		assert_eq!(wheel.expired(now), Vec::<&str>::new());
		assert_eq!(wheel.expired(now + Duration::from_secs(2)), vec!["a", "b"]);
		assert_eq!(wheel.expired(now + Duration::from_secs(5)), vec!["c"]);
		assert_eq!(wheel.pending(), 0);
	}

	#[test]
	fn tombstoned_entries_are_skipped() {
		let mut wheel = TimerWheel::new();
		let now = Instant::now();
		let t1 = wheel.schedule_at(now + Duration::from_secs(1), 1u32);
		let t2 = wheel.schedule_at(now + Duration::from_secs(2), 2u32);
		wheel.cancel(t1);
		assert!(!wheel.is_pending(t1));
		assert!(wheel.is_pending(t2));

		assert_eq!(wheel.next_deadline(), Some(now + Duration::from_secs(2)));
		assert_eq!(wheel.expired(now + Duration::from_secs(3)), vec![2]);
	}

	#[test]
	fn cancel_after_fire_is_noop() {
		let mut wheel = TimerWheel::new();
		let now = Instant::now();
		let t = wheel.schedule_at(now, ());
		assert_eq!(wheel.expired(now).len(), 1);
		wheel.cancel(t);
	}
}
