/// A named achievement tied to an exact visit-count threshold, optionally
/// carrying a point bonus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Milestone {
    pub label: String,
    pub bonus_points: i64,
}

impl Milestone {
    pub fn new(label: &str, bonus_points: i64) -> Self {
        Self {
            label: label.to_owned(),
            bonus_points,
        }
    }
}

/// Table-driven mapping from a visit count to an optional milestone.
///
/// The match is exact integer equality: only the listed counts award
/// anything, every other count maps to none. Extending the milestone set is
/// a table edit; the visit handler never changes.
#[derive(Debug, Clone)]
pub struct MilestoneTable {
    entries: Vec<(i64, Milestone)>,
}

impl MilestoneTable {
    pub fn new(entries: Vec<(i64, Milestone)>) -> Self {
        Self { entries }
    }

    /// Look up the milestone awarded at exactly `visit_count` visits.
    pub fn for_visit_count(&self, visit_count: i64) -> Option<&Milestone> {
        self.entries
            .iter()
            .find(|(count, _)| *count == visit_count)
            .map(|(_, milestone)| milestone)
    }
}

impl Default for MilestoneTable {
    fn default() -> Self {
        Self::new(vec![
            (5, Milestone::new("5 Visits", 25)),
            (10, Milestone::new("10 Visits", 50)),
            (25, Milestone::new("25 Visits", 100)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_awards_the_three_thresholds() {
        let table = MilestoneTable::default();

        assert_eq!(
            table.for_visit_count(5),
            Some(&Milestone::new("5 Visits", 25))
        );
        assert_eq!(
            table.for_visit_count(10),
            Some(&Milestone::new("10 Visits", 50))
        );
        assert_eq!(
            table.for_visit_count(25),
            Some(&Milestone::new("25 Visits", 100))
        );
    }

    #[test]
    fn unlisted_counts_award_nothing() {
        let table = MilestoneTable::default();

        for count in [0, 1, 4, 6, 9, 11, 24, 26, 50, 100] {
            assert_eq!(table.for_visit_count(count), None, "count {}", count);
        }
    }

    #[test]
    fn the_table_is_extensible() {
        let table = MilestoneTable::new(vec![(3, Milestone::new("Hat Trick", 5))]);

        assert_eq!(
            table.for_visit_count(3),
            Some(&Milestone::new("Hat Trick", 5))
        );
        assert_eq!(table.for_visit_count(5), None);
    }
}
