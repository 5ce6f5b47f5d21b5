use std::{collections::HashMap, sync::Mutex};

/// Broad category a counter belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatType {
	Message,
	Vote,
	Block,
	Gap,
	Bootstrap,
	ConfirmationHeight,
	Election,
	Drop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatDetail {
	// message
	Publish,
	ConfirmReq,
	ConfirmAck,
	// vote
	VoteValid,
	VoteReplay,
	VoteInvalid,
	VoteIndeterminate,
	VoteOverflow,
	VoteGenerated,
	// block
	Progress,
	Old,
	GapPrevious,
	GapSource,
	Fork,
	BadSignature,
	Invalid,
	// bootstrap
	LazyStarted,
	// confirmation height
	Cemented,
	AlreadyCemented,
	// election
	ElectionStart,
	ElectionConfirmed,
	ElectionDropExpired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
	In,
	Out,
}

/// Plain counter registry. This is node-internal accounting (and the oracle
/// several tests assert on), not an external metrics surface.
#[derive(Default)]
pub struct Stats {
	counters: Mutex<HashMap<(StatType, StatDetail, Direction), u64>>,
}

impl Stats {
	pub fn inc(&self, stat_type: StatType, detail: StatDetail, dir: Direction) {
		self.add(stat_type, detail, dir, 1);
	}

	pub fn add(&self, stat_type: StatType, detail: StatDetail, dir: Direction, value: u64) {
		*self.counters.lock().unwrap().entry((stat_type, detail, dir)).or_default() += value;
	}

	pub fn count(&self, stat_type: StatType, detail: StatDetail, dir: Direction) -> u64 {
		self.counters.lock().unwrap().get(&(stat_type, detail, dir)).copied().unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counters_accumulate_independently() {
		let stats = Stats::default();
		stats.inc(StatType::Message, StatDetail::Publish, Direction::Out);
		stats.inc(StatType::Message, StatDetail::Publish, Direction::Out);
		stats.inc(StatType::Message, StatDetail::Publish, Direction::In);
		stats.add(StatType::Vote, StatDetail::VoteOverflow, Direction::In, 5);

		assert_eq!(stats.count(StatType::Message, StatDetail::Publish, Direction::Out), 2);
		assert_eq!(stats.count(StatType::Message, StatDetail::Publish, Direction::In), 1);
		assert_eq!(stats.count(StatType::Vote, StatDetail::VoteOverflow, Direction::In), 5);
		assert_eq!(stats.count(StatType::Vote, StatDetail::VoteValid, Direction::In), 0);
	}
}
