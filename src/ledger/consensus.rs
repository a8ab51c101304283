use rand::Rng;

use std::collections::BTreeMap;

use super::balance::BalanceIndex;
use super::crypto::Address;

/// Stake a validator must hold to qualify for selection
pub const DEFAULT_MINIMUM_STAKE: u64 = 1000;

/// Default proof-of-work difficulty: required leading zero hex digits
pub const DEFAULT_DIFFICULTY: u8 = 3;

/// The registered proof-of-stake validators and their stakes.
///
/// Iteration order is fixed (sorted by address) so the weighted draw walks
/// validators deterministically for a given random value.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    stakes: BTreeMap<Address, u64>,
    minimum_stake: u64,
}

impl ValidatorSet {
    pub fn new(minimum_stake: u64) -> Self {
        ValidatorSet {
            stakes: BTreeMap::new(),
            minimum_stake,
        }
    }

    pub fn minimum_stake(&self) -> u64 {
        self.minimum_stake
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    pub fn stake_of(&self, address: &Address) -> Option<u64> {
        self.stakes.get(address).copied()
    }

    /// Registers a validator. Returns false (and registers nothing) when the
    /// offered stake is below the minimum.
    pub fn register(&mut self, address: Address, stake: u64) -> bool {
        if stake < self.minimum_stake {
            return false;
        }

        self.stakes.insert(address, stake);
        true
    }

    /// Promotes every address whose derived balance meets the minimum stake.
    /// Used to bootstrap an empty validator set before a production attempt.
    pub fn auto_promote(&mut self, balances: &BalanceIndex) {
        for (address, balance) in balances.snapshot() {
            if balance >= self.minimum_stake as i64 {
                self.stakes.insert(address, balance as u64);
            }
        }
    }

    pub fn total_stake(&self) -> u64 {
        self.stakes.values().sum()
    }

    /// Stake-weighted random selection: draw a uniform value in
    /// `[0, total_stake)` and walk validators in address order, accumulating
    /// stakes until the running total crosses the draw. Selection
    /// probability is proportional to stake share.
    pub fn select(&self) -> Option<Address> {
        let total = self.total_stake();
        if total == 0 {
            return None;
        }

        let draw = rand::thread_rng().gen_range(0..total);

        let mut cumulative = 0u64;
        for (address, stake) in &self.stakes {
            cumulative += stake;
            if cumulative > draw {
                return Some(address.clone());
            }
        }

        None
    }

    /// Updates a validator's stake to its freshly derived balance, demoting
    /// it when the balance has fallen below the minimum
    pub fn refresh(&mut self, address: &Address, new_stake: u64) {
        if new_stake < self.minimum_stake {
            self.stakes.remove(address);
        } else if let Some(stake) = self.stakes.get_mut(address) {
            *stake = new_stake;
        }
    }

    /// All validators with their stakes, in address order
    pub fn entries(&self) -> Vec<(Address, u64)> {
        self.stakes
            .iter()
            .map(|(address, stake)| (address.clone(), *stake))
            .collect()
    }
}

/// The block production policy, chosen at ledger construction time.
///
/// Proof of work gates production by computational cost; proof of stake
/// selects a producer among registered validators by stake weight.
#[derive(Debug, Clone)]
pub enum ConsensusPolicy {
    ProofOfWork { difficulty: u8 },
    ProofOfStake { validators: ValidatorSet },
}

impl ConsensusPolicy {
    pub fn proof_of_work(difficulty: u8) -> Self {
        ConsensusPolicy::ProofOfWork { difficulty }
    }

    pub fn proof_of_stake(minimum_stake: u64) -> Self {
        ConsensusPolicy::ProofOfStake {
            validators: ValidatorSet::new(minimum_stake),
        }
    }

    /// The proof-of-work difficulty; absent under proof of stake
    pub fn difficulty(&self) -> Option<u8> {
        match self {
            ConsensusPolicy::ProofOfWork { difficulty } => Some(*difficulty),
            ConsensusPolicy::ProofOfStake { .. } => None,
        }
    }
}
