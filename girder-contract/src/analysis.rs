//! Read-only profit roll-up across contracts, change orders, payments and
//! the finance module. Tolerates partial data: a project without a
//! contract reports zero amounts, not an error.

use crate::models::ContractStatus;
use crate::repository::{ChangeOrderRepository, ContractRepository, PaymentApplicationRepository};
use girder_core::finance::FinanceReader;
use girder_core::DomainResult;
use girder_shared::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Margin figures for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectProfit {
    pub project_id: Uuid,
    pub contract_amount: Decimal,
    pub change_order_amount: Decimal,
    pub current_amount: Decimal,
    pub total_cost: Decimal,
    pub gross_profit: Decimal,
    /// `gross / current` as a 4dp ratio; 0 when there is no amount yet.
    pub margin_rate: Decimal,
    pub total_invoiced: Decimal,
    pub total_received: Decimal,
    /// Accounts receivable: invoiced minus received.
    pub receivable: Decimal,
    /// Accounts payable: unpaid cost entries.
    pub payable: Decimal,
}

/// Roll-up over every project with an ACTIVE contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub contract_amount: Decimal,
    pub current_amount: Decimal,
    pub total_cost: Decimal,
    pub gross_profit: Decimal,
    pub margin_rate: Decimal,
    pub projects: Vec<ProjectProfit>,
}

pub struct ProfitAnalysisAggregator {
    contracts: Arc<dyn ContractRepository>,
    changes: Arc<dyn ChangeOrderRepository>,
    payments: Arc<dyn PaymentApplicationRepository>,
    finance: Arc<dyn FinanceReader>,
}

impl ProfitAnalysisAggregator {
    pub fn new(
        contracts: Arc<dyn ContractRepository>,
        changes: Arc<dyn ChangeOrderRepository>,
        payments: Arc<dyn PaymentApplicationRepository>,
        finance: Arc<dyn FinanceReader>,
    ) -> Self {
        Self {
            contracts,
            changes,
            payments,
            finance,
        }
    }

    pub async fn project_profit(&self, project_id: Uuid) -> DomainResult<ProjectProfit> {
        // Not every project has progressed to contract stage.
        let contract_amount = self
            .contracts
            .find_by_project(project_id)
            .await?
            .map(|c| c.original_amount)
            .unwrap_or_default();
        // Filtered by project, not contract, so foreign rows never leak in.
        let change_order_amount = self.changes.approved_total_for_project(project_id).await?;
        let current_amount = contract_amount + change_order_amount;

        let costs = self.finance.costs_for_project(project_id).await?;
        let total_cost: Decimal = costs.iter().map(|c| c.amount).sum();
        let payable: Decimal = costs.iter().filter(|c| !c.paid).map(|c| c.amount).sum();

        let total_received: Decimal = self
            .payments
            .list_by_project(project_id)
            .await?
            .iter()
            .map(|p| p.received_amount)
            .sum();
        let total_invoiced = self.finance.invoiced_total(project_id).await?;

        let gross_profit = current_amount - total_cost;
        let margin_rate = if current_amount.is_zero() {
            Decimal::ZERO
        } else {
            money::round_rate(gross_profit / current_amount)
        };

        Ok(ProjectProfit {
            project_id,
            contract_amount,
            change_order_amount,
            current_amount,
            total_cost,
            gross_profit,
            margin_rate,
            total_invoiced,
            total_received,
            receivable: total_invoiced - total_received,
            payable,
        })
    }

    /// Sums per-project analyses over all ACTIVE contracts' projects.
    pub async fn dashboard(&self) -> DomainResult<DashboardSummary> {
        let mut project_ids: Vec<Uuid> = self
            .contracts
            .list_by_status(ContractStatus::Active)
            .await?
            .into_iter()
            .map(|c| c.project_id)
            .collect();
        project_ids.sort();
        project_ids.dedup();

        let mut projects = Vec::with_capacity(project_ids.len());
        for project_id in project_ids {
            projects.push(self.project_profit(project_id).await?);
        }

        let contract_amount: Decimal = projects.iter().map(|p| p.contract_amount).sum();
        let current_amount: Decimal = projects.iter().map(|p| p.current_amount).sum();
        let total_cost: Decimal = projects.iter().map(|p| p.total_cost).sum();
        let gross_profit = current_amount - total_cost;
        let margin_rate = if current_amount.is_zero() {
            Decimal::ZERO
        } else {
            money::round_rate(gross_profit / current_amount)
        };

        Ok(DashboardSummary {
            contract_amount,
            current_amount,
            total_cost,
            gross_profit,
            margin_rate,
            projects,
        })
    }
}
