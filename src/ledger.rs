use crate::affectation::AffectationLedger;
use crate::closing::ClosingStateMachine;
use crate::config::PlanillaConfig;
use crate::expenses::ExpenseLedger;
use crate::register::RegisterManager;
use crate::registry::Registry;
use crate::settlement::{BalanceAggregator, DebtAggregator, TotalsCalculator};
use crate::store::Store;

/// Every ledger component wired to one store.
#[derive(Clone)]
pub struct Ledger {
    pub registry: Registry,
    pub registers: RegisterManager,
    pub debts: DebtAggregator,
    pub totals: TotalsCalculator,
    pub balances: BalanceAggregator,
    pub closing: ClosingStateMachine,
    pub expenses: ExpenseLedger,
    pub affectations: AffectationLedger,
}

impl Ledger {
    pub fn new(store: Store, config: &PlanillaConfig) -> Self {
        Self {
            registry: Registry::new(store.clone()),
            registers: RegisterManager::new(store.clone()),
            debts: DebtAggregator::new(store.clone()),
            totals: TotalsCalculator::new(store.clone()),
            balances: BalanceAggregator::new(store.clone()),
            closing: ClosingStateMachine::new(store.clone(), config.require_close_before_post),
            expenses: ExpenseLedger::new(store.clone()),
            affectations: AffectationLedger::new(store),
        }
    }
}
