//! Rollup views derived from the grouped state
//!
//! Every view is a pure function of `GroupedAggregates` and is rebuilt
//! from scratch on each trigger. Row types serialize with the column
//! names the dashboard reads.
//!
//! Ties are broken deterministically: the peak hour is the smallest hour
//! sharing the highest count, the most common type is the
//! lexicographically smallest type sharing the highest count, and
//! institutions with equal totals are ranked by name.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use txn_types::keys::{HourOfDay, MonthYear};
use txn_types::numeric::average;

use crate::aggregator::{GroupedAggregates, SubAggregate};

/// Global KPI snapshot (single row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiRow {
    #[serde(rename = "total_processado")]
    pub total: Decimal,
    #[serde(rename = "qtd_total")]
    pub count: u64,
    #[serde(rename = "media_geral")]
    pub average: Decimal,
    #[serde(rename = "maior_transacao")]
    pub max: Decimal,
    #[serde(rename = "menor_transacao")]
    pub min: Decimal,
    #[serde(rename = "hora_pico")]
    pub peak_hour: HourOfDay,
    #[serde(rename = "tipo_mais_comum")]
    pub most_common_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRow {
    #[serde(rename = "mes_ano")]
    pub month: MonthYear,
    #[serde(rename = "total_mes")]
    pub total: Decimal,
    #[serde(rename = "qtd_mes")]
    pub count: u64,
    #[serde(rename = "ticket_medio_mes")]
    pub average: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionRow {
    #[serde(rename = "instituicao")]
    pub institution: String,
    #[serde(rename = "soma_valor")]
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyRow {
    #[serde(rename = "hora_simples")]
    pub hour: HourOfDay,
    #[serde(rename = "qtd_transacoes")]
    pub count: u64,
    #[serde(rename = "soma_valor")]
    pub total: Decimal,
}

/// The four views published on every non-empty trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rollups {
    pub kpis: Option<KpiRow>,
    pub monthly: Vec<MonthlyRow>,
    pub institutions: Vec<InstitutionRow>,
    pub hourly: Vec<HourlyRow>,
}

impl Rollups {
    pub fn compute(state: &GroupedAggregates) -> Self {
        Self {
            kpis: global_kpis(state),
            monthly: monthly_series(state),
            institutions: institution_ranking(state),
            hourly: hourly_distribution(state),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kpis.is_none()
            && self.monthly.is_empty()
            && self.institutions.is_empty()
            && self.hourly.is_empty()
    }
}

fn add_count(total: &mut u64, count: u64) {
    *total = total.saturating_add(count);
}

/// Regroup `agg` under a coarser key.
fn merge_into<K: Ord>(groups: &mut BTreeMap<K, SubAggregate>, key: K, agg: &SubAggregate) {
    groups
        .entry(key)
        .and_modify(|existing| existing.merge(agg))
        .or_insert(*agg);
}

/// Key with the largest count; the first key in map order wins ties.
fn argmax_count<K: Clone>(counts: &BTreeMap<K, u64>) -> Option<K> {
    let mut best: Option<(&K, u64)> = None;
    for (key, &count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((key, count)),
        }
    }
    best.map(|(key, _)| key.clone())
}

/// Global KPIs, or `None` when nothing has been aggregated yet.
pub fn global_kpis(state: &GroupedAggregates) -> Option<KpiRow> {
    let mut overall: Option<SubAggregate> = None;
    let mut per_hour: BTreeMap<HourOfDay, u64> = BTreeMap::new();
    let mut per_type: BTreeMap<&str, u64> = BTreeMap::new();

    for (key, agg) in state.iter() {
        match overall.as_mut() {
            Some(total) => total.merge(agg),
            None => overall = Some(*agg),
        }
        add_count(per_hour.entry(key.hour).or_insert(0), agg.count);
        add_count(per_type.entry(key.kind.as_str()).or_insert(0), agg.count);
    }

    let overall = overall?;
    Some(KpiRow {
        total: overall.sum,
        count: overall.count,
        average: average(overall.sum, overall.count),
        max: overall.max,
        min: overall.min,
        peak_hour: argmax_count(&per_hour)?,
        most_common_type: argmax_count(&per_type)?.to_string(),
    })
}

/// One row per month, chronological.
pub fn monthly_series(state: &GroupedAggregates) -> Vec<MonthlyRow> {
    let mut months: BTreeMap<MonthYear, SubAggregate> = BTreeMap::new();
    for (key, agg) in state.iter() {
        merge_into(&mut months, key.month, agg);
    }

    months
        .into_iter()
        .map(|(month, agg)| MonthlyRow {
            month,
            total: agg.sum,
            count: agg.count,
            average: average(agg.sum, agg.count),
        })
        .collect()
}

/// One row per institution, highest total first.
pub fn institution_ranking(state: &GroupedAggregates) -> Vec<InstitutionRow> {
    let mut totals: BTreeMap<&str, SubAggregate> = BTreeMap::new();
    for (key, agg) in state.iter() {
        merge_into(&mut totals, key.institution.as_str(), agg);
    }

    let mut rows: Vec<InstitutionRow> = totals
        .into_iter()
        .map(|(institution, agg)| InstitutionRow {
            institution: institution.to_string(),
            total: agg.sum,
        })
        .collect();
    // stable sort keeps name order among equal totals
    rows.sort_by(|a, b| b.total.cmp(&a.total));
    rows
}

/// One row per hour of day that has data, ascending.
pub fn hourly_distribution(state: &GroupedAggregates) -> Vec<HourlyRow> {
    let mut hours: BTreeMap<HourOfDay, SubAggregate> = BTreeMap::new();
    for (key, agg) in state.iter() {
        merge_into(&mut hours, key.hour, agg);
    }

    hours
        .into_iter()
        .map(|(hour, agg)| HourlyRow {
            hour,
            count: agg.count,
            total: agg.sum,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::parse_line;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn state(lines: &[&str]) -> GroupedAggregates {
        lines.iter().map(|l| parse_line(l).unwrap()).collect()
    }

    fn scenario() -> GroupedAggregates {
        state(&[
            "1;1234,56;15/03/2024;10:30;BankA;PIX",
            "2;500,00;15/03/2024;14:00;BankB;TED",
        ])
    }

    #[test]
    fn test_scenario_kpis() {
        let kpis = global_kpis(&scenario()).unwrap();
        assert_eq!(kpis.total, dec("1734.56"));
        assert_eq!(kpis.count, 2);
        assert_eq!(kpis.average, dec("867.28"));
        assert_eq!(kpis.max, dec("1234.56"));
        assert_eq!(kpis.min, dec("500.00"));
        // both hours and both types have one record each
        assert_eq!(kpis.peak_hour, 10);
        assert_eq!(kpis.most_common_type, "PIX");
    }

    #[test]
    fn test_rollups_saturate_at_decimal_bounds() {
        let mut huge = parse_line("1;1,00;15/03/2024;10:30;BankA;PIX").unwrap();
        huge.value = Decimal::MAX;
        let mut other = huge.clone();
        other.institution = "BankB".to_string();
        let grouped: GroupedAggregates = vec![huge, other].into_iter().collect();

        let rollups = Rollups::compute(&grouped);
        let kpis = rollups.kpis.unwrap();
        assert_eq!(kpis.total, Decimal::MAX);
        assert_eq!(kpis.count, 2);
        assert_eq!(rollups.monthly[0].total, Decimal::MAX);
        assert_eq!(rollups.hourly[0].total, Decimal::MAX);
        assert_eq!(rollups.institutions.len(), 2);
    }

    #[test]
    fn test_scenario_institutions() {
        let rows = institution_ranking(&scenario());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].institution, "BankA");
        assert_eq!(rows[0].total, dec("1234.56"));
        assert_eq!(rows[1].institution, "BankB");
        assert_eq!(rows[1].total, dec("500.00"));
    }

    #[test]
    fn test_scenario_monthly() {
        let rows = monthly_series(&scenario());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].month.to_string(), "2024-03");
        assert_eq!(rows[0].total, dec("1734.56"));
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[0].average, dec("867.28"));
    }

    #[test]
    fn test_peak_hour_and_type_pick_highest_count() {
        let kpis = global_kpis(&state(&[
            "1;1,00;01/01/2024;09:00;A;TED",
            "2;1,00;01/01/2024;15:10;A;TED",
            "3;1,00;01/01/2024;15:20;B;PIX",
            "4;1,00;01/01/2024;15:30;C;TED",
            "5;900,00;01/01/2024;09:00;C;PIX",
        ]))
        .unwrap();
        assert_eq!(kpis.peak_hour, 15);
        assert_eq!(kpis.most_common_type, "TED");
    }

    #[test]
    fn test_monthly_is_chronological() {
        let rows = monthly_series(&state(&[
            "1;1,00;01/02/2024;09:00;A;TED",
            "2;2,00;31/12/2023;09:00;A;TED",
            "3;3,00;15/01/2024;09:00;A;TED",
        ]));
        let months: Vec<String> = rows.iter().map(|r| r.month.to_string()).collect();
        assert_eq!(months, vec!["2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn test_institution_ties_ordered_by_name() {
        let rows = institution_ranking(&state(&[
            "1;5,00;01/01/2024;09:00;Zeta;TED",
            "2;5,00;01/01/2024;09:00;Alpha;TED",
            "3;9,00;01/01/2024;09:00;Mid;TED",
        ]));
        let names: Vec<&str> = rows.iter().map(|r| r.institution.as_str()).collect();
        assert_eq!(names, vec!["Mid", "Alpha", "Zeta"]);
    }

    #[test]
    fn test_hourly_sorted_ascending() {
        let rows = hourly_distribution(&state(&[
            "1;1,00;01/01/2024;23:00;A;TED",
            "2;2,00;01/01/2024;00:30;A;TED",
            "3;3,00;02/01/2024;00:45;B;PIX",
        ]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hour, 0);
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[0].total, dec("5.00"));
        assert_eq!(rows[1].hour, 23);
    }

    #[test]
    fn test_empty_state_yields_empty_rollups() {
        let rollups = Rollups::compute(&GroupedAggregates::new());
        assert!(rollups.is_empty());
        assert!(rollups.kpis.is_none());
    }

    #[test]
    fn test_negative_values_are_aggregated() {
        let kpis = global_kpis(&state(&[
            "1;-10,00;01/01/2024;09:00;A;ESTORNO",
            "2;30,00;01/01/2024;09:00;A;PIX",
        ]))
        .unwrap();
        assert_eq!(kpis.total, dec("20.00"));
        assert_eq!(kpis.min, dec("-10.00"));
        assert_eq!(kpis.average, dec("10.00"));
    }
}
