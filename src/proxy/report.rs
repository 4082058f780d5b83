//! Dedup, ordering and summary of validated proxies

use crate::proxy::models::{ValidatedProxy, ValidationOutcome};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Countries listed first in the priority report, in rank order
pub const DEFAULT_PRIORITY_COUNTRIES: [&str; 4] = ["ID", "MY", "SG", "HK"];

/// Alphabetical order: country code, then IP as a string
pub fn compare_alphabetical(a: &ValidatedProxy, b: &ValidatedProxy) -> Ordering {
    a.country
        .cmp(&b.country)
        .then_with(|| a.ip.to_string().cmp(&b.ip.to_string()))
}

/// Ranked priority list; position in the list is the rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityOrder {
    countries: Vec<String>,
}

impl PriorityOrder {
    pub fn new<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ranked: Vec<String> = Vec::new();
        for country in countries {
            let code = country.as_ref().trim().to_uppercase();
            if !code.is_empty() && !ranked.contains(&code) {
                ranked.push(code);
            }
        }
        Self { countries: ranked }
    }

    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    pub fn rank(&self, country: &str) -> Option<usize> {
        self.countries.iter().position(|c| c == country)
    }

    /// Priority countries by rank, then everyone else alphabetically
    pub fn compare(&self, a: &ValidatedProxy, b: &ValidatedProxy) -> Ordering {
        match (self.rank(&a.country), self.rank(&b.country)) {
            (Some(ra), Some(rb)) => ra
                .cmp(&rb)
                .then_with(|| a.ip.to_string().cmp(&b.ip.to_string())),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => compare_alphabetical(a, b),
        }
    }
}

impl Default for PriorityOrder {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY_COUNTRIES)
    }
}

/// Both orderings of the deduplicated live proxies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub alphabetical: Vec<ValidatedProxy>,
    pub priority: Vec<ValidatedProxy>,
    /// Live outcomes dropped as duplicate `ip:port` entries
    pub duplicates: usize,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.alphabetical.is_empty()
    }

    pub fn len(&self) -> usize {
        self.alphabetical.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    priority: PriorityOrder,
}

impl ReportBuilder {
    pub fn new(priority: PriorityOrder) -> Self {
        Self { priority }
    }

    pub fn priority(&self) -> &PriorityOrder {
        &self.priority
    }

    /// Collect valid outcomes, drop duplicate `ip:port` pairs and sort.
    ///
    /// Sorting happens before dedup so the surviving duplicate does not
    /// depend on task completion order.
    pub fn build(&self, outcomes: &[ValidationOutcome]) -> Report {
        let mut live: Vec<ValidatedProxy> = outcomes
            .iter()
            .filter_map(|outcome| outcome.proxy.clone())
            .collect();
        live.sort_by(|a, b| {
            compare_alphabetical(a, b)
                .then_with(|| a.port.cmp(&b.port))
                .then_with(|| a.org.cmp(&b.org))
        });

        let before = live.len();
        let mut seen = HashSet::new();
        live.retain(|proxy| seen.insert((proxy.ip, proxy.port.clone())));
        let duplicates = before - live.len();

        let mut priority = live.clone();
        priority.sort_by(|a, b| self.priority.compare(a, b));

        Report {
            alphabetical: live,
            priority,
            duplicates,
        }
    }

    /// Count proxies per country: priority countries first (zero counts
    /// included), then the rest alphabetically
    pub fn country_summary(&self, proxies: &[ValidatedProxy]) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for proxy in proxies {
            *counts.entry(proxy.country.as_str()).or_insert(0) += 1;
        }

        let mut summary: Vec<(String, usize)> = self
            .priority
            .countries()
            .iter()
            .map(|country| (country.clone(), counts.get(country.as_str()).copied().unwrap_or(0)))
            .collect();
        summary.extend(
            counts
                .into_iter()
                .filter(|(country, _)| self.priority.rank(country).is_none())
                .map(|(country, count)| (country.to_string(), count)),
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::{ProxyCandidate, ProxySource};

    fn proxy(ip: &str, port: &str, country: &str) -> ValidatedProxy {
        ValidatedProxy {
            ip: ip.parse().unwrap(),
            port: port.to_string(),
            country: country.to_string(),
            org: "Org".to_string(),
            city: None,
            source: ProxySource::Trace,
        }
    }

    fn outcomes(proxies: Vec<ValidatedProxy>) -> Vec<ValidationOutcome> {
        proxies
            .into_iter()
            .map(|p| {
                let candidate = ProxyCandidate::new(p.ip, p.port.clone(), "", "");
                ValidationOutcome::valid(candidate, p)
            })
            .collect()
    }

    fn addresses(proxies: &[ValidatedProxy]) -> Vec<String> {
        proxies
            .iter()
            .map(|p| format!("{}:{}", p.country, p.ip))
            .collect()
    }

    #[test]
    fn test_alphabetical_order() {
        let builder = ReportBuilder::default();
        let report = builder.build(&outcomes(vec![
            proxy("9.9.9.9", "80", "US"),
            proxy("2.2.2.2", "80", "DE"),
            proxy("10.1.1.1", "80", "US"),
            proxy("1.1.1.1", "80", "US"),
        ]));

        // IP compares as a string, so 10.x sorts before 9.x
        assert_eq!(
            addresses(&report.alphabetical),
            vec!["DE:2.2.2.2", "US:1.1.1.1", "US:10.1.1.1", "US:9.9.9.9"]
        );
    }

    #[test]
    fn test_alphabetical_order_is_independent_of_input_order() {
        let input = vec![
            proxy("5.5.5.5", "80", "SG"),
            proxy("4.4.4.4", "80", "AU"),
            proxy("3.3.3.3", "80", "SG"),
        ];
        let mut reversed = input.clone();
        reversed.reverse();

        let builder = ReportBuilder::default();
        assert_eq!(
            builder.build(&outcomes(input)).alphabetical,
            builder.build(&outcomes(reversed)).alphabetical
        );
    }

    #[test]
    fn test_priority_order_uses_rank() {
        let builder = ReportBuilder::default();
        let report = builder.build(&outcomes(vec![
            proxy("1.1.1.1", "80", "AU"),
            proxy("2.2.2.2", "80", "HK"),
            proxy("3.3.3.3", "80", "ID"),
            proxy("4.4.4.4", "80", "SG"),
            proxy("5.5.5.5", "80", "BR"),
            proxy("6.6.6.6", "80", "ID"),
            proxy("7.7.7.7", "80", "MY"),
        ]));

        assert_eq!(
            addresses(&report.priority),
            vec![
                "ID:3.3.3.3",
                "ID:6.6.6.6",
                "MY:7.7.7.7",
                "SG:4.4.4.4",
                "HK:2.2.2.2",
                "AU:1.1.1.1",
                "BR:5.5.5.5"
            ]
        );
    }

    #[test]
    fn test_priority_entries_precede_others() {
        let builder = ReportBuilder::new(PriorityOrder::new(["us", "ZZ"]));
        let report = builder.build(&outcomes(vec![
            proxy("1.1.1.1", "80", "AA"),
            proxy("2.2.2.2", "80", "ZZ"),
            proxy("3.3.3.3", "80", "US"),
            proxy("4.4.4.4", "80", "BB"),
        ]));

        let first_other = report
            .priority
            .iter()
            .position(|p| builder.priority().rank(&p.country).is_none())
            .unwrap();
        assert!(report.priority[..first_other]
            .iter()
            .all(|p| builder.priority().rank(&p.country).is_some()));
        assert!(report.priority[first_other..]
            .iter()
            .all(|p| builder.priority().rank(&p.country).is_none()));
        assert_eq!(report.priority[0].country, "US");
    }

    #[test]
    fn test_empty_priority_matches_alphabetical() {
        let builder = ReportBuilder::new(PriorityOrder::new(Vec::<String>::new()));
        let report = builder.build(&outcomes(vec![
            proxy("3.3.3.3", "80", "ID"),
            proxy("1.1.1.1", "80", "US"),
            proxy("2.2.2.2", "80", "AU"),
        ]));
        assert_eq!(report.priority, report.alphabetical);
    }

    #[test]
    fn test_dedup_by_ip_and_port() {
        let builder = ReportBuilder::default();
        let report = builder.build(&outcomes(vec![
            proxy("1.1.1.1", "80", "US"),
            proxy("1.1.1.1", "80", "DE"),
            proxy("1.1.1.1", "443", "US"),
        ]));

        assert_eq!(report.len(), 2);
        assert_eq!(report.duplicates, 1);
        // The alphabetically first entry survives
        assert!(report
            .alphabetical
            .iter()
            .any(|p| p.port == "80" && p.country == "DE"));
    }

    #[test]
    fn test_invalid_outcomes_ignored() {
        let candidate = ProxyCandidate::new("1.1.1.1".parse().unwrap(), "80", "US", "Org");
        let report = ReportBuilder::default().build(&[ValidationOutcome::invalid(candidate)]);
        assert!(report.is_empty());
    }

    #[test]
    fn test_priority_order_normalizes_input() {
        let order = PriorityOrder::new([" id", "my", "ID", ""]);
        assert_eq!(order.countries(), &["ID".to_string(), "MY".to_string()]);
        assert_eq!(order.rank("MY"), Some(1));
        assert_eq!(order.rank("SG"), None);
    }

    #[test]
    fn test_country_summary() {
        let builder = ReportBuilder::default();
        let proxies = vec![
            proxy("1.1.1.1", "80", "US"),
            proxy("2.2.2.2", "80", "ID"),
            proxy("3.3.3.3", "80", "US"),
            proxy("4.4.4.4", "80", "AU"),
        ];

        let summary = builder.country_summary(&proxies);
        assert_eq!(
            summary,
            vec![
                ("ID".to_string(), 1),
                ("MY".to_string(), 0),
                ("SG".to_string(), 0),
                ("HK".to_string(), 0),
                ("AU".to_string(), 1),
                ("US".to_string(), 2),
            ]
        );
    }
}
