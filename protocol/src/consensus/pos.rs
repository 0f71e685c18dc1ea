//! # Proof-of-Stake Consensus
//!
//! A validator registry with delegation, round-robin proposer rotation
//! weighted by stake, slashing, and per-epoch reward distribution.
//!
//! This is deliberately simpler than a BFT consensus engine: there's no
//! vote/quorum/finality machinery here, just the bookkeeping a block
//! producer and a reward-distribution job both need. `select_block_proposer`
//! is a plain round-robin over the active set sorted by total stake —
//! higher stake earns a slot sooner in the rotation, not a higher chance in
//! a lottery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::transaction::types::Address;

/// Errors raised by stake registration, delegation, or slashing.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("validator {0} is not registered")]
    UnknownValidator(String),

    #[error("stake {0} is below the minimum of {1}")]
    InsufficientStake(u128, u128),

    #[error("validator set is full ({0} validators)")]
    ValidatorSetFull(usize),

    #[error("delegator {0} has no delegation to validator {1}")]
    UnknownDelegation(String, String),

    #[error("cannot undelegate {requested}, only {available} is delegated")]
    InsufficientDelegation { requested: u128, available: u128 },

    #[error("active validator set is empty, no proposer can be selected")]
    EmptyValidatorSet,
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// A registered validator and its accumulated stake/performance history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub address: Address,
    /// Stake the validator posted directly (excludes delegations).
    pub self_stake: u128,
    /// Sum of all delegated stake currently backing this validator.
    pub delegated_stake: u128,
    pub active: bool,
    pub blocks_proposed: u64,
    pub slash_count: u32,
    pub registered_at_height: u64,
}

impl ValidatorRecord {
    /// Total weight used for rotation ordering and reward shares.
    pub fn total_stake(&self) -> u128 {
        self.self_stake + self.delegated_stake
    }
}

/// A single delegator's stake backing a single validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegator: Address,
    pub validator: Address,
    pub amount: u128,
    pub delegated_at_height: u64,
}

/// A recorded slashing event, kept for auditability even after the
/// validator's stake has already been reduced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingEvent {
    pub validator: Address,
    pub height: u64,
    pub reason: String,
    pub amount_slashed: u128,
}

/// Proof-of-stake validator registry, delegation ledger, and proposer
/// rotation.
#[derive(Debug, Default)]
pub struct ProofOfStake {
    min_stake: u128,
    max_validators: usize,
    epoch_length: u64,
    slashing_percentage: u8,

    validators: HashMap<Address, ValidatorRecord>,
    delegations: HashMap<(Address, Address), DelegationRecord>,
    slashing_history: Vec<SlashingEvent>,

    /// Addresses currently eligible for proposer rotation, ordered by
    /// descending total stake. Recomputed at every epoch boundary.
    active_set: Vec<Address>,
    current_epoch: u64,
    epoch_start_height: u64,
}

impl ProofOfStake {
    pub fn new(min_stake: u128, max_validators: usize, epoch_length: u64, slashing_percentage: u8) -> Self {
        Self {
            min_stake,
            max_validators,
            epoch_length,
            slashing_percentage,
            validators: HashMap::new(),
            delegations: HashMap::new(),
            slashing_history: Vec::new(),
            active_set: Vec::new(),
            current_epoch: 0,
            epoch_start_height: 0,
        }
    }

    /// Builds an engine from [`crate::config::PosConfig`].
    pub fn from_config(config: crate::config::PosConfig) -> Self {
        Self::new(
            config.min_stake,
            config.max_validators,
            config.epoch_length,
            config.slashing_percentage,
        )
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    pub fn validator(&self, address: &Address) -> Option<&ValidatorRecord> {
        self.validators.get(address)
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    pub fn active_validators(&self) -> &[Address] {
        &self.active_set
    }

    pub fn slashing_history(&self) -> &[SlashingEvent] {
        &self.slashing_history
    }

    /// Registers a new validator with `self_stake`. Fails if the stake is
    /// below the configured minimum or the active set is already full.
    pub fn register_validator(
        &mut self,
        address: Address,
        self_stake: u128,
        height: u64,
    ) -> ConsensusResult<()> {
        if self_stake < self.min_stake {
            return Err(ConsensusError::InsufficientStake(self_stake, self.min_stake));
        }
        if self.validators.len() >= self.max_validators && !self.validators.contains_key(&address) {
            return Err(ConsensusError::ValidatorSetFull(self.max_validators));
        }

        self.validators.insert(
            address,
            ValidatorRecord {
                address,
                self_stake,
                delegated_stake: 0,
                active: true,
                blocks_proposed: 0,
                slash_count: 0,
                registered_at_height: height,
            },
        );
        self.recompute_active_set();
        Ok(())
    }

    /// Delegates `amount` of stake from `delegator` to `validator`.
    pub fn delegate(
        &mut self,
        delegator: Address,
        validator: Address,
        amount: u128,
        height: u64,
    ) -> ConsensusResult<()> {
        let record = self
            .validators
            .get_mut(&validator)
            .ok_or_else(|| ConsensusError::UnknownValidator(validator.to_hex()))?;
        record.delegated_stake += amount;

        self.delegations
            .entry((delegator, validator))
            .and_modify(|d| d.amount += amount)
            .or_insert(DelegationRecord {
                delegator,
                validator,
                amount,
                delegated_at_height: height,
            });

        self.recompute_active_set();
        Ok(())
    }

    /// Withdraws `amount` of previously delegated stake.
    pub fn undelegate(
        &mut self,
        delegator: Address,
        validator: Address,
        amount: u128,
    ) -> ConsensusResult<()> {
        let key = (delegator, validator);
        let delegation = self
            .delegations
            .get_mut(&key)
            .ok_or_else(|| ConsensusError::UnknownDelegation(delegator.to_hex(), validator.to_hex()))?;

        if amount > delegation.amount {
            return Err(ConsensusError::InsufficientDelegation {
                requested: amount,
                available: delegation.amount,
            });
        }

        delegation.amount -= amount;
        let remove_delegation = delegation.amount == 0;

        if let Some(record) = self.validators.get_mut(&validator) {
            record.delegated_stake = record.delegated_stake.saturating_sub(amount);
        }
        if remove_delegation {
            self.delegations.remove(&key);
        }

        self.recompute_active_set();
        Ok(())
    }

    /// Recomputes the active set: every registered validator, sorted by
    /// total stake descending and capped at `max_validators`.
    fn recompute_active_set(&mut self) {
        let mut addresses: Vec<Address> = self.validators.keys().copied().collect();
        addresses.sort_by(|a, b| {
            let stake_a = self.validators[a].total_stake();
            let stake_b = self.validators[b].total_stake();
            stake_b.cmp(&stake_a).then_with(|| a.to_hex().cmp(&b.to_hex()))
        });
        addresses.truncate(self.max_validators);
        self.active_set = addresses;
    }

    /// Selects the proposer for `height` via round-robin over the active
    /// set: `active_set[height % active_set.len()]`.
    pub fn select_block_proposer(&mut self, height: u64) -> ConsensusResult<Address> {
        if self.active_set.is_empty() {
            return Err(ConsensusError::EmptyValidatorSet);
        }
        let index = (height % self.active_set.len() as u64) as usize;
        let proposer = self.active_set[index];
        if let Some(record) = self.validators.get_mut(&proposer) {
            record.blocks_proposed += 1;
        }
        Ok(proposer)
    }

    /// Slashes `validator`'s self-stake by the configured percentage,
    /// recording the event. Delegated stake is untouched — delegators bear
    /// slashing risk only through reduced future rewards, not principal
    /// loss, which keeps the accounting here local to the validator.
    pub fn slash(&mut self, validator: Address, height: u64, reason: impl Into<String>) -> ConsensusResult<u128> {
        let record = self
            .validators
            .get_mut(&validator)
            .ok_or_else(|| ConsensusError::UnknownValidator(validator.to_hex()))?;

        let amount_slashed = record.self_stake * self.slashing_percentage as u128 / 100;
        record.self_stake = record.self_stake.saturating_sub(amount_slashed);
        record.slash_count += 1;
        if record.self_stake < self.min_stake {
            record.active = false;
        }

        self.slashing_history.push(SlashingEvent {
            validator,
            height,
            reason: reason.into(),
            amount_slashed,
        });

        self.recompute_active_set();
        Ok(amount_slashed)
    }

    /// Computes each active validator's share of `total_reward`,
    /// proportional to total stake. Remainder photons from integer division
    /// go to the first validator in the active set, so the sum of shares
    /// always equals `total_reward` exactly.
    pub fn calculate_rewards(&self, total_reward: u128) -> HashMap<Address, u128> {
        let mut shares = HashMap::new();
        if self.active_set.is_empty() || total_reward == 0 {
            return shares;
        }

        let total_stake: u128 = self
            .active_set
            .iter()
            .map(|a| self.validators[a].total_stake())
            .sum();
        if total_stake == 0 {
            return shares;
        }

        let mut distributed = 0u128;
        for (i, address) in self.active_set.iter().enumerate() {
            let stake = self.validators[address].total_stake();
            let share = if i == self.active_set.len() - 1 {
                total_reward - distributed
            } else {
                total_reward * stake / total_stake
            };
            distributed += share;
            shares.insert(*address, share);
        }
        shares
    }

    /// Splits `total_reward` by stake and returns, per validator, the
    /// self-stake/delegator split within its share (proportional to
    /// self-stake vs. delegated stake).
    pub fn distribute_rewards(&self, total_reward: u128) -> HashMap<Address, (u128, u128)> {
        let shares = self.calculate_rewards(total_reward);
        shares
            .into_iter()
            .map(|(address, share)| {
                let record = &self.validators[&address];
                let total = record.total_stake();
                let self_share = if total == 0 { share } else { share * record.self_stake / total };
                let delegator_share = share - self_share;
                (address, (self_share, delegator_share))
            })
            .collect()
    }

    /// Advances the epoch if `height` has crossed an epoch boundary,
    /// recomputing the active set. Returns `true` if a new epoch started.
    pub fn update_epoch(&mut self, height: u64) -> bool {
        if height < self.epoch_start_height + self.epoch_length {
            return false;
        }
        self.current_epoch += 1;
        self.epoch_start_height = height;
        self.recompute_active_set();
        true
    }
}
