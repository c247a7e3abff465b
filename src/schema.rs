use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The fifteen canonical line items every period model carries.
///
/// The declaration order is the canonical order of the comparative table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum ConceptKey {
    TotalOperatingIncome,
    TotalOperatingExpense,
    NetSales,
    FixedAssetGain,
    TotalIncome,
    CostOfSales,
    GrossProfit,
    GeneralExpenses,
    ProfitSharingTax,
    FixedAssetLoss,
    TotalOperatingExpenseDetail,
    FixedAssetSaleProceeds,
    FixedAssetCost,
    FixedAssetNetResult,
    OperatingProfit,
}

impl ConceptKey {
    pub const ALL: [ConceptKey; 15] = [
        ConceptKey::TotalOperatingIncome,
        ConceptKey::TotalOperatingExpense,
        ConceptKey::NetSales,
        ConceptKey::FixedAssetGain,
        ConceptKey::TotalIncome,
        ConceptKey::CostOfSales,
        ConceptKey::GrossProfit,
        ConceptKey::GeneralExpenses,
        ConceptKey::ProfitSharingTax,
        ConceptKey::FixedAssetLoss,
        ConceptKey::TotalOperatingExpenseDetail,
        ConceptKey::FixedAssetSaleProceeds,
        ConceptKey::FixedAssetCost,
        ConceptKey::FixedAssetNetResult,
        ConceptKey::OperatingProfit,
    ];

    /// Display label used as the `concept` of a comparative row.
    pub fn label(self) -> &'static str {
        match self {
            Self::TotalOperatingIncome => "Total Operating Income",
            Self::TotalOperatingExpense => "Total Operating Expenditure",
            Self::NetSales => "Income",
            Self::FixedAssetGain => "Fixed Asset Gain",
            Self::TotalIncome => "Total Income",
            Self::CostOfSales => "Cost of Sales",
            Self::GrossProfit => "Gross Profit",
            Self::GeneralExpenses => "General Expenses",
            Self::ProfitSharingTax => "Profit Sharing Tax",
            Self::FixedAssetLoss => "Fixed Asset Loss",
            Self::TotalOperatingExpenseDetail => "Total Operating Costs",
            Self::FixedAssetSaleProceeds => "Fixed Asset Sale Proceeds",
            Self::FixedAssetCost => "Fixed Asset Cost",
            Self::FixedAssetNetResult => "Fixed Asset Net Result",
            Self::OperatingProfit => "Operating Profit",
        }
    }

    /// Field name in the extraction payload and in [`FinancialPeriodModel`] JSON.
    pub fn json_key(self) -> &'static str {
        match self {
            Self::TotalOperatingIncome => "totalOperatingIncome",
            Self::TotalOperatingExpense => "totalOperatingExpense",
            Self::NetSales => "netSales",
            Self::FixedAssetGain => "fixedAssetGain",
            Self::TotalIncome => "totalIncome",
            Self::CostOfSales => "costOfSales",
            Self::GrossProfit => "grossProfit",
            Self::GeneralExpenses => "generalExpenses",
            Self::ProfitSharingTax => "profitSharingTax",
            Self::FixedAssetLoss => "fixedAssetLoss",
            Self::TotalOperatingExpenseDetail => "totalOperatingExpenseDetail",
            Self::FixedAssetSaleProceeds => "fixedAssetSaleProceeds",
            Self::FixedAssetCost => "fixedAssetCost",
            Self::FixedAssetNetResult => "fixedAssetNetResult",
            Self::OperatingProfit => "operatingProfit",
        }
    }

    /// Field name used by older extraction payloads (Spanish-language statements).
    pub fn legacy_key(self) -> &'static str {
        match self {
            Self::TotalOperatingIncome => "totalIngresosOperativos",
            Self::TotalOperatingExpense => "totalEgresosOperativos",
            Self::NetSales => "ingresos",
            Self::FixedAssetGain => "utilidadActivoFijo",
            Self::TotalIncome => "ingresosTotales",
            Self::CostOfSales => "costoVentas",
            Self::GrossProfit => "utilidadBruta",
            Self::GeneralExpenses => "gastosGenerales",
            Self::ProfitSharingTax => "ptu",
            Self::FixedAssetLoss => "perdidaActivoFijo",
            Self::TotalOperatingExpenseDetail => "totalGastosOperacion",
            Self::FixedAssetSaleProceeds => "ventaActivoFijo",
            Self::FixedAssetCost => "costoActivoFijo",
            Self::FixedAssetNetResult => "utilidadPerdidaActivoFijo",
            Self::OperatingProfit => "utilidadOperativa",
        }
    }

    /// Lower-case line labels that identify this concept in a statement.
    pub fn line_aliases(self) -> &'static [&'static str] {
        match self {
            Self::TotalOperatingIncome => &["total operating income", "total de ingresos operativos"],
            Self::TotalOperatingExpense => &[
                "total operating expenditure",
                "total operating expenses",
                "total de egresos operativos",
            ],
            Self::NetSales => &["net sales", "ventas netas"],
            Self::FixedAssetGain => &[
                "fixed asset gain",
                "gain on fixed assets",
                "utilidad activo fijo",
            ],
            Self::TotalIncome => &["total income", "total revenue", "ingresos totales"],
            Self::CostOfSales => &["cost of sales", "cost of goods sold", "costo de ventas"],
            Self::GrossProfit => &["gross profit", "utilidad bruta"],
            Self::GeneralExpenses => &[
                "selling, general and administrative expenses",
                "general expenses",
                "gastos de venta, administración y generales",
                "gastos generales",
            ],
            Self::ProfitSharingTax => &[
                "profit sharing tax",
                "income taxes",
                "impuestos a la utilidad",
                "ptu",
            ],
            Self::FixedAssetLoss => &[
                "fixed asset loss",
                "loss on fixed assets",
                "pérdida activo fijo",
            ],
            Self::TotalOperatingExpenseDetail => {
                &["total operating costs", "total gastos de operación"]
            }
            Self::FixedAssetSaleProceeds => &[
                "fixed asset sale proceeds",
                "sale of fixed assets",
                "venta de activo fijo",
            ],
            Self::FixedAssetCost => &[
                "fixed asset cost",
                "cost of fixed assets sold",
                "costo de activo fijo",
            ],
            Self::FixedAssetNetResult => &[
                "fixed asset net result",
                "other comprehensive income",
                "otros resultados integrales",
            ],
            Self::OperatingProfit => &[
                "operating profit",
                "operating income",
                "utilidad (pérdida) de operación",
                "utilidad de operación",
            ],
        }
    }

    /// Exact, case-insensitive lookup by label, JSON key or legacy key.
    pub fn from_label(text: &str) -> Option<Self> {
        let needle = text.trim();
        Self::ALL.into_iter().find(|key| {
            key.label().eq_ignore_ascii_case(needle)
                || key.json_key().eq_ignore_ascii_case(needle)
                || key.legacy_key().eq_ignore_ascii_case(needle)
        })
    }
}

impl fmt::Display for ConceptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One reporting period of the income statement, every amount resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FinancialPeriodModel {
    pub total_operating_income: Decimal,
    pub total_operating_expense: Decimal,
    pub net_sales: Decimal,
    pub fixed_asset_gain: Decimal,
    pub total_income: Decimal,
    pub cost_of_sales: Decimal,
    pub gross_profit: Decimal,
    pub general_expenses: Decimal,
    pub profit_sharing_tax: Decimal,
    pub fixed_asset_loss: Decimal,
    pub total_operating_expense_detail: Decimal,
    pub fixed_asset_sale_proceeds: Decimal,
    pub fixed_asset_cost: Decimal,
    pub fixed_asset_net_result: Decimal,
    pub operating_profit: Decimal,
    /// Free-text year or period identifier, e.g. "2024".
    pub period: String,
}

impl FinancialPeriodModel {
    pub fn get(&self, key: ConceptKey) -> Decimal {
        match key {
            ConceptKey::TotalOperatingIncome => self.total_operating_income,
            ConceptKey::TotalOperatingExpense => self.total_operating_expense,
            ConceptKey::NetSales => self.net_sales,
            ConceptKey::FixedAssetGain => self.fixed_asset_gain,
            ConceptKey::TotalIncome => self.total_income,
            ConceptKey::CostOfSales => self.cost_of_sales,
            ConceptKey::GrossProfit => self.gross_profit,
            ConceptKey::GeneralExpenses => self.general_expenses,
            ConceptKey::ProfitSharingTax => self.profit_sharing_tax,
            ConceptKey::FixedAssetLoss => self.fixed_asset_loss,
            ConceptKey::TotalOperatingExpenseDetail => self.total_operating_expense_detail,
            ConceptKey::FixedAssetSaleProceeds => self.fixed_asset_sale_proceeds,
            ConceptKey::FixedAssetCost => self.fixed_asset_cost,
            ConceptKey::FixedAssetNetResult => self.fixed_asset_net_result,
            ConceptKey::OperatingProfit => self.operating_profit,
        }
    }

    pub fn set(&mut self, key: ConceptKey, value: Decimal) {
        let slot = match key {
            ConceptKey::TotalOperatingIncome => &mut self.total_operating_income,
            ConceptKey::TotalOperatingExpense => &mut self.total_operating_expense,
            ConceptKey::NetSales => &mut self.net_sales,
            ConceptKey::FixedAssetGain => &mut self.fixed_asset_gain,
            ConceptKey::TotalIncome => &mut self.total_income,
            ConceptKey::CostOfSales => &mut self.cost_of_sales,
            ConceptKey::GrossProfit => &mut self.gross_profit,
            ConceptKey::GeneralExpenses => &mut self.general_expenses,
            ConceptKey::ProfitSharingTax => &mut self.profit_sharing_tax,
            ConceptKey::FixedAssetLoss => &mut self.fixed_asset_loss,
            ConceptKey::TotalOperatingExpenseDetail => &mut self.total_operating_expense_detail,
            ConceptKey::FixedAssetSaleProceeds => &mut self.fixed_asset_sale_proceeds,
            ConceptKey::FixedAssetCost => &mut self.fixed_asset_cost,
            ConceptKey::FixedAssetNetResult => &mut self.fixed_asset_net_result,
            ConceptKey::OperatingProfit => &mut self.operating_profit,
        };
        *slot = value;
    }
}

/// The current period and, when the documents report one, the comparison period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodPair {
    pub current: FinancialPeriodModel,
    pub previous: Option<FinancialPeriodModel>,
}

/// A ratio or percentage cell: a number, or the literal `"N/A"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Value(Decimal),
    NotAvailable,
}

pub const NOT_AVAILABLE: &str = "N/A";

impl Metric {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            Self::Value(v) => Some(*v),
            Self::NotAvailable => None,
        }
    }
}

impl Default for Metric {
    fn default() -> Self {
        Self::Value(Decimal::ZERO)
    }
}

impl From<Decimal> for Metric {
    fn from(value: Decimal) -> Self {
        Self::Value(value)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{}", v.normalize()),
            Self::NotAvailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => Serialize::serialize(v, serializer),
            Self::NotAvailable => serializer.serialize_str(NOT_AVAILABLE),
        }
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(Decimal),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Ok(Self::Value(v)),
            Raw::Text(s) if s.trim() == NOT_AVAILABLE => Ok(Self::NotAvailable),
            Raw::Text(s) => Decimal::from_str(s.trim())
                .map(Self::Value)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// One line of the comparative table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparativeRow {
    pub concept: String,
    pub current: Decimal,
    pub previous: Decimal,
    pub variation: Decimal,
    pub percentage_change: Metric,
}

impl ComparativeRow {
    /// The canonical concept this row displays, when its label is one of the canonical labels.
    pub fn key(&self) -> Option<ConceptKey> {
        ConceptKey::from_label(&self.concept)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RatioSet {
    pub gross_margin: Metric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_margin_change: Option<String>,
    pub operating_margin: Metric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_margin_change: Option<String>,
    pub net_margin: Metric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_margin_change: Option<String>,
    pub sales_growth: Metric,
}

/// The analysis a session shows and corrects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub current_period: String,
    pub previous_period: String,
    pub executive_summary: String,
    pub ratios: RatioSet,
    pub comparative_data: Vec<ComparativeRow>,
    pub recommendations: Vec<String>,
}

impl AnalysisResult {
    pub fn row(&self, key: ConceptKey) -> Option<&ComparativeRow> {
        self.comparative_data
            .iter()
            .find(|row| row.key() == Some(key))
    }
}

/// A value that may have been produced by a static fallback instead of the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradable<T> {
    pub value: T,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl<T> Degradable<T> {
    pub fn genuine(value: T) -> Self {
        Self {
            value,
            degraded: false,
            reason: None,
        }
    }

    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            degraded: true,
            reason: Some(reason.into()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Degradable<U> {
        Degradable {
            value: f(self.value),
            degraded: self.degraded,
            reason: self.reason,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum DocumentKind {
    /// Estado de resultados.
    #[serde(rename = "er")]
    IncomeStatement,
    /// Balanza de comprobación.
    #[serde(rename = "bc")]
    TrialBalance,
}

impl DocumentKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::IncomeStatement => "Income Statement",
            Self::TrialBalance => "Trial Balance",
        }
    }
}

/// Plain text extracted from one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentText {
    pub original_name: String,
    pub mime_type: String,
    pub kind: DocumentKind,
    pub content: String,
}
