//! Fund-flow analyzer & operation classifier (C10).
//!
//! `analyze_fund_flow` collects asset movements relative to the tracked
//! address and sets the flag set spec §4.9 names; `classify` applies the
//! 14-row ordered rule table verbatim — first match wins. The rule table is
//! the authoritative semantic contract; any reimplementation must mirror it
//! exactly, so each row below is a direct `if` in call order, not a lookup
//! table that could silently reorder under refactoring.

use crate::model::{
    AssetMovement, Direction, Fees, Movements, Note, NoteSeverity, Operation, OperationCategory,
    PrimaryRef,
};
use crate::money::from_smallest_unit;

pub struct RawFundFlowInput {
    pub module: String,
    pub call: String,
    pub from: String,
    pub to: String,
    pub amount_planck: i128,
    pub fee_planck: i128,
    pub event_count: u64,
    pub decimals: u32,
    pub asset: String,
}

pub struct AddressContext {
    pub user_address: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChainConfig {
    pub bridge_modules: Vec<String>,
    pub ibc_modules: Vec<String>,
    pub contract_modules: Vec<String>,
}

impl ChainConfig {
    fn bridge_modules_or_default(&self) -> Vec<&str> {
        if self.bridge_modules.is_empty() {
            vec!["bridge", "xcm", "xcmpallet"]
        } else {
            self.bridge_modules.iter().map(|s| s.as_str()).collect()
        }
    }

    fn ibc_modules_or_default(&self) -> Vec<&str> {
        if self.ibc_modules.is_empty() {
            vec!["ibc"]
        } else {
            self.ibc_modules.iter().map(|s| s.as_str()).collect()
        }
    }

    fn contract_modules_or_default(&self) -> Vec<&str> {
        if self.contract_modules.is_empty() {
            vec!["contracts", "evm"]
        } else {
            self.contract_modules.iter().map(|s| s.as_str()).collect()
        }
    }
}

pub struct FundFlow {
    pub movements: Movements,
    pub fees: Fees,
    pub module: String,
    pub call: String,
    pub self_initiated: bool,
    pub event_count: u64,
    pub has_staking: bool,
    pub has_governance: bool,
    pub has_bridge_transfer: bool,
    pub has_ibc_transfer: bool,
    pub has_contract_interaction: bool,
    pub has_utility_batch: bool,
    pub has_proxy: bool,
    pub has_multisig: bool,
    pub classification_uncertainty: Option<String>,
}

const SELF_STAKING_CALLS: &[&str] = &["bond", "bond_extra", "unbond", "withdraw_unbonded", "nominate", "chill"];
const GOVERNANCE_CALLS: &[&str] = &["propose", "vote", "refund", "second", "unlock"];

pub fn analyze_fund_flow(
    raw: &RawFundFlowInput,
    ctx: &AddressContext,
    config: &ChainConfig,
) -> FundFlow {
    let self_initiated = raw.from == ctx.user_address;
    let is_inflow = raw.to == ctx.user_address && raw.from != ctx.user_address;
    let is_outflow = raw.from == ctx.user_address && raw.to != ctx.user_address;

    let mut movements = Movements::default();
    if raw.amount_planck > 0 {
        let amount = from_smallest_unit(raw.amount_planck, raw.decimals);
        if is_inflow {
            movements.inflows.push(AssetMovement::new(raw.asset.clone(), amount, Direction::In));
            movements.primary = Some(PrimaryRef::Inflow(0));
        } else if is_outflow {
            movements.outflows.push(AssetMovement::new(raw.asset.clone(), amount, Direction::Out));
            movements.primary = Some(PrimaryRef::Outflow(0));
        }
    }

    let has_outflows = !movements.outflows.is_empty();
    let mut fees = Fees::default();
    if raw.fee_planck > 0 && (self_initiated || has_outflows) {
        fees.network = Some(AssetMovement::new(
            raw.asset.clone(),
            from_smallest_unit(raw.fee_planck, raw.decimals),
            Direction::Out,
        ));
    }

    let module_lower = raw.module.to_lowercase();
    let has_bridge_transfer = config
        .bridge_modules_or_default()
        .iter()
        .any(|m| *m == module_lower);
    let has_ibc_transfer = config.ibc_modules_or_default().iter().any(|m| *m == module_lower);
    let has_contract_interaction = config
        .contract_modules_or_default()
        .iter()
        .any(|m| *m == module_lower);

    FundFlow {
        movements,
        fees,
        module: module_lower.clone(),
        call: raw.call.to_lowercase(),
        self_initiated,
        event_count: raw.event_count,
        has_staking: module_lower == "staking",
        has_governance: matches!(module_lower.as_str(), "governance" | "democracy" | "council"),
        has_bridge_transfer,
        has_ibc_transfer,
        has_contract_interaction,
        has_utility_batch: module_lower == "utility" && raw.call.to_lowercase().contains("batch"),
        has_proxy: module_lower == "proxy",
        has_multisig: module_lower == "multisig",
        classification_uncertainty: None,
    }
}

/// The ordered rule table from spec §4.9. Returns `(operation, notes)`.
pub fn classify(flow: &FundFlow) -> (Operation, Vec<Note>) {
    let has_inflow = !flow.movements.inflows.is_empty();
    let has_outflow = !flow.movements.outflows.is_empty();
    let zero_value = flow.movements.inflows.is_empty() && flow.movements.outflows.is_empty();

    // rule 1: staking bond/unbond/withdraw, self-initiated.
    if flow.has_staking && flow.self_initiated && SELF_STAKING_CALLS.contains(&flow.call.as_str()) {
        let kind = match flow.call.as_str() {
            "unbond" | "withdraw_unbonded" => "unstake",
            _ => "stake",
        };
        let mut notes = Vec::new();
        if matches!(flow.call.as_str(), "nominate" | "chill") {
            notes.push(Note::new(
                "staking_management",
                NoteSeverity::Info,
                format!("staking management call: {}", flow.call),
            ));
        }
        return (Operation::new(OperationCategory::Staking, kind), notes);
    }

    // rule 2: staking inflow w/ zero fee, not self-initiated -> reward.
    if flow.has_staking && has_inflow && flow.fees.network.is_none() && !flow.self_initiated {
        return (Operation::new(OperationCategory::Staking, "reward"), Vec::new());
    }

    // rule 3: governance propose/vote/refund.
    if flow.has_governance && GOVERNANCE_CALLS.contains(&flow.call.as_str()) {
        let kind = match flow.call.as_str() {
            "propose" | "second" => "proposal",
            "vote" => "vote",
            _ => "refund",
        };
        return (Operation::new(OperationCategory::Governance, kind), Vec::new());
    }

    // rule 4: utility batch (event count > 1).
    if flow.has_utility_batch && flow.event_count > 1 {
        let note = Note::new(
            "batch_operation",
            NoteSeverity::Warning,
            format!("batch call with {} events", flow.event_count),
        );
        return (Operation::new(OperationCategory::Transfer, "transfer"), vec![note]);
    }

    // rule 5: proxy / multisig call.
    if flow.has_proxy || flow.has_multisig {
        let note = Note::new(
            "delegated_call",
            NoteSeverity::Info,
            "executed via proxy or multisig".to_string(),
        );
        return (Operation::new(OperationCategory::Transfer, "transfer"), vec![note]);
    }

    // rule 6: contract call, zero value.
    if flow.has_contract_interaction && zero_value {
        let note = Note::new(
            "contract_interaction",
            NoteSeverity::Info,
            "zero-value contract call".to_string(),
        );
        return (Operation::new(OperationCategory::Transfer, "transfer"), vec![note]);
    }

    // rule 7: zero value, no movements.
    if zero_value {
        return (Operation::new(OperationCategory::Fee, "fee"), Vec::new());
    }

    // rule 8: bridge, inflows only.
    if flow.has_bridge_transfer && has_inflow && !has_outflow {
        let note = Note::new("bridge_transfer", NoteSeverity::Info, "bridge deposit".to_string());
        return (Operation::new(OperationCategory::Transfer, "deposit"), vec![note]);
    }

    // rule 9: bridge, outflows only.
    if flow.has_bridge_transfer && has_outflow && !has_inflow {
        let note = Note::new("bridge_transfer", NoteSeverity::Info, "bridge withdrawal".to_string());
        return (Operation::new(OperationCategory::Transfer, "withdrawal"), vec![note]);
    }

    // rule 10: 1 outflow + 1 inflow, different assets -> swap.
    if flow.movements.inflows.len() == 1
        && flow.movements.outflows.len() == 1
        && flow.movements.inflows[0].asset != flow.movements.outflows[0].asset
    {
        let note = Note::new("trade", NoteSeverity::Info, "single-asset-pair swap".to_string());
        return (Operation::new(OperationCategory::Trade, "swap"), vec![note]);
    }

    // rule 11: only inflows.
    if has_inflow && !has_outflow {
        return (Operation::new(OperationCategory::Transfer, "deposit"), Vec::new());
    }

    // rule 12: only outflows.
    if has_outflow && !has_inflow {
        return (Operation::new(OperationCategory::Transfer, "withdrawal"), Vec::new());
    }

    // rule 13: 1 outflow + 1 inflow, same asset.
    if flow.movements.inflows.len() == 1
        && flow.movements.outflows.len() == 1
        && flow.movements.inflows[0].asset == flow.movements.outflows[0].asset
    {
        return (Operation::new(OperationCategory::Transfer, "transfer"), Vec::new());
    }

    // rule 14: otherwise.
    let note = Note::new(
        "classification_failed",
        NoteSeverity::Warning,
        "fund flow did not match any known pattern".to_string(),
    );
    (Operation::new(OperationCategory::Transfer, "transfer"), vec![note])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AddressContext {
        AddressContext {
            user_address: "13user".to_string(),
        }
    }

    #[test]
    fn self_initiated_bond_is_stake() {
        let raw = RawFundFlowInput {
            module: "staking".to_string(),
            call: "bond".to_string(),
            from: "13user".to_string(),
            to: "13user".to_string(),
            amount_planck: 10_000_000_000,
            fee_planck: 156_250_000,
            event_count: 1,
            decimals: 10,
            asset: "DOT".to_string(),
        };
        let flow = analyze_fund_flow(&raw, &ctx(), &ChainConfig::default());
        let (op, _) = classify(&flow);
        assert_eq!(op.category, OperationCategory::Staking);
        assert_eq!(op.kind, "stake");
    }

    #[test]
    fn non_self_initiated_bond_with_zero_fee_is_reward() {
        let raw = RawFundFlowInput {
            module: "staking".to_string(),
            call: "bond".to_string(),
            from: "14someone".to_string(),
            to: "13user".to_string(),
            amount_planck: 5_000_000_000,
            fee_planck: 0,
            event_count: 1,
            decimals: 10,
            asset: "DOT".to_string(),
        };
        let flow = analyze_fund_flow(&raw, &ctx(), &ChainConfig::default());
        let (op, notes) = classify(&flow);
        assert_eq!(op.category, OperationCategory::Staking);
        assert_eq!(op.kind, "reward");
        assert!(notes.is_empty());
        assert!(flow.fees.network.is_none());
    }

    #[test]
    fn utility_batch_wins_over_generic_transfer() {
        let raw = RawFundFlowInput {
            module: "utility".to_string(),
            call: "batch_all".to_string(),
            from: "13user".to_string(),
            to: "13user".to_string(),
            amount_planck: 0,
            fee_planck: 100_000_000,
            event_count: 6,
            decimals: 10,
            asset: "DOT".to_string(),
        };
        let flow = analyze_fund_flow(&raw, &ctx(), &ChainConfig::default());
        let (op, notes) = classify(&flow);
        assert_eq!(op.kind, "transfer");
        assert_eq!(notes[0].kind, "batch_operation");
        assert_eq!(notes[0].severity, NoteSeverity::Warning);
    }

    #[test]
    fn only_outflow_is_withdrawal() {
        let raw = RawFundFlowInput {
            module: "balances".to_string(),
            call: "transfer".to_string(),
            from: "13user".to_string(),
            to: "14someone".to_string(),
            amount_planck: 10_000_000_000,
            fee_planck: 156_250_000,
            event_count: 2,
            decimals: 10,
            asset: "DOT".to_string(),
        };
        let flow = analyze_fund_flow(&raw, &ctx(), &ChainConfig::default());
        let (op, _) = classify(&flow);
        assert_eq!(op.category, OperationCategory::Transfer);
        assert_eq!(op.kind, "withdrawal");
    }

    #[test]
    fn zero_value_no_movements_is_fee() {
        let raw = RawFundFlowInput {
            module: "system".to_string(),
            call: "remark".to_string(),
            from: "13user".to_string(),
            to: "13user".to_string(),
            amount_planck: 0,
            fee_planck: 1_000_000,
            event_count: 1,
            decimals: 10,
            asset: "DOT".to_string(),
        };
        let flow = analyze_fund_flow(&raw, &ctx(), &ChainConfig::default());
        let (op, _) = classify(&flow);
        assert_eq!(op.category, OperationCategory::Fee);
    }
}
