use std::cmp::Ordering;

use shared::{
    domain::{Commission, CommissionStatus},
    protocol::CommissionListItem,
};

/// Tabs of the client's own commission list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTab {
    All,
    Draft,
    Pending,
    Accepted,
    Completed,
}

pub const FILTER_TABS: [FilterTab; 5] = [
    FilterTab::All,
    FilterTab::Draft,
    FilterTab::Pending,
    FilterTab::Accepted,
    FilterTab::Completed,
];

impl FilterTab {
    pub fn label(self) -> &'static str {
        match self {
            FilterTab::All => "all",
            FilterTab::Draft => "draft",
            FilterTab::Pending => "pending",
            FilterTab::Accepted => "accepted",
            FilterTab::Completed => "completed",
        }
    }

    pub fn matches(self, status: CommissionStatus) -> bool {
        match self {
            FilterTab::All => true,
            FilterTab::Draft => status == CommissionStatus::Draft,
            FilterTab::Pending => status == CommissionStatus::Submitted,
            FilterTab::Accepted => matches!(
                status,
                CommissionStatus::Waitlist | CommissionStatus::Payment | CommissionStatus::Wip
            ),
            FilterTab::Completed => status == CommissionStatus::Finished,
        }
    }
}

pub fn filter_commissions(commissions: &[Commission], tab: FilterTab) -> Vec<&Commission> {
    commissions
        .iter()
        .filter(|commission| tab.matches(commission.status))
        .collect()
}

/// Per-tab counts shown on the tab strip.
pub fn tab_counts(commissions: &[Commission]) -> Vec<(FilterTab, usize)> {
    FILTER_TABS
        .iter()
        .map(|tab| {
            let count = commissions
                .iter()
                .filter(|commission| tab.matches(commission.status))
                .count();
            (*tab, count)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Date,
    Client,
    Category,
    Price,
}

/// Filter and sort settings of the admin commission table.
#[derive(Debug, Clone, Default)]
pub struct AdminFilter {
    pub status: Option<CommissionStatus>,
    pub search: String,
    pub sort: SortKey,
    pub ascending: bool,
}

impl AdminFilter {
    fn matches(&self, item: &CommissionListItem) -> bool {
        if let Some(status) = self.status {
            if item.commission.status != status {
                return false;
            }
        }

        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let client = item.client_name.as_deref().unwrap_or("").to_lowercase();
        let category = item.commission.category_name.to_lowercase();
        let type_name = item.commission.type_name.to_lowercase();
        client.contains(&needle) || category.contains(&needle) || type_name.contains(&needle)
    }

    fn compare(&self, a: &CommissionListItem, b: &CommissionListItem) -> Ordering {
        let ordering = match self.sort {
            SortKey::Date => a.commission.created_at.cmp(&b.commission.created_at),
            SortKey::Client => {
                let a_name = a.client_name.as_deref().unwrap_or("").to_lowercase();
                let b_name = b.client_name.as_deref().unwrap_or("").to_lowercase();
                a_name.cmp(&b_name)
            }
            SortKey::Category => {
                let a_name = a.commission.category_name.to_lowercase();
                let b_name = b.commission.category_name.to_lowercase();
                a_name.cmp(&b_name)
            }
            SortKey::Price => a
                .commission
                .total_price
                .partial_cmp(&b.commission.total_price)
                .unwrap_or(Ordering::Equal),
        };
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Applies an admin filter to the full table: status match, then a
/// case-insensitive substring search over client and path names, then
/// the selected sort.
pub fn project_admin_table<'a>(
    items: &'a [CommissionListItem],
    filter: &AdminFilter,
) -> Vec<&'a CommissionListItem> {
    let mut rows: Vec<&CommissionListItem> =
        items.iter().filter(|item| filter.matches(item)).collect();
    rows.sort_by(|a, b| filter.compare(a, b));
    rows
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shared::domain::{CommissionId, UsageRights, UserId};

    use super::*;

    fn commission(id: i64, status: CommissionStatus) -> Commission {
        Commission {
            id: CommissionId(id),
            user_id: UserId(1),
            offer_id: None,
            category_name: "illustration".into(),
            type_name: "bust".into(),
            subtype_name: None,
            base_price: 100.0,
            final_price: None,
            character_count: 1,
            extra_character_price: 0.0,
            usage_rights: UsageRights::Personal,
            allow_streaming: true,
            comm_specific_inputs: Vec::new(),
            addons: Vec::new(),
            reference_urls: Vec::new(),
            extra_info: None,
            status,
            total_price: 100.0,
            created_at: Utc.timestamp_opt(id * 1000, 0).unwrap(),
            updated_at: Utc.timestamp_opt(id * 1000, 0).unwrap(),
            waitlisted_at: None,
            payment_requested_at: None,
            payment_received_at: None,
            work_started_at: None,
            completed_at: None,
            form_snapshot: None,
        }
    }

    fn item(id: i64, status: CommissionStatus, client: &str, category: &str, price: f64) -> CommissionListItem {
        let mut commission = commission(id, status);
        commission.category_name = category.to_string();
        commission.total_price = price;
        CommissionListItem {
            commission,
            client_name: Some(client.to_string()),
        }
    }

    #[test]
    fn tabs_partition_statuses() {
        assert!(FilterTab::Pending.matches(CommissionStatus::Submitted));
        assert!(!FilterTab::Pending.matches(CommissionStatus::Wip));
        assert!(FilterTab::Accepted.matches(CommissionStatus::Waitlist));
        assert!(FilterTab::Accepted.matches(CommissionStatus::Payment));
        assert!(FilterTab::Accepted.matches(CommissionStatus::Wip));
        assert!(FilterTab::Completed.matches(CommissionStatus::Finished));
        assert!(FilterTab::Draft.matches(CommissionStatus::Draft));
    }

    #[test]
    fn tab_counts_cover_every_commission() {
        let commissions = vec![
            commission(1, CommissionStatus::Draft),
            commission(2, CommissionStatus::Submitted),
            commission(3, CommissionStatus::Wip),
            commission(4, CommissionStatus::Finished),
        ];
        let counts = tab_counts(&commissions);
        assert_eq!(counts[0], (FilterTab::All, 4));
        assert_eq!(counts[1], (FilterTab::Draft, 1));
        assert_eq!(counts[2], (FilterTab::Pending, 1));
        assert_eq!(counts[3], (FilterTab::Accepted, 1));
        assert_eq!(counts[4], (FilterTab::Completed, 1));

        let filtered = filter_commissions(&commissions, FilterTab::Accepted);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, CommissionId(3));
    }

    #[test]
    fn admin_search_matches_client_and_category_case_insensitively() {
        let items = vec![
            item(1, CommissionStatus::Submitted, "Alice", "illustration", 100.0),
            item(2, CommissionStatus::Submitted, "bob", "Chibi", 50.0),
        ];

        let filter = AdminFilter {
            search: "ALI".into(),
            ascending: true,
            ..AdminFilter::default()
        };
        let rows = project_admin_table(&items, &filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commission.id, CommissionId(1));

        let filter = AdminFilter {
            search: "chibi".into(),
            ascending: true,
            ..AdminFilter::default()
        };
        let rows = project_admin_table(&items, &filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commission.id, CommissionId(2));
    }

    #[test]
    fn admin_status_filter_narrows_the_table() {
        let items = vec![
            item(1, CommissionStatus::Submitted, "alice", "illustration", 100.0),
            item(2, CommissionStatus::Wip, "bob", "chibi", 50.0),
        ];
        let filter = AdminFilter {
            status: Some(CommissionStatus::Wip),
            ascending: true,
            ..AdminFilter::default()
        };
        let rows = project_admin_table(&items, &filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commission.id, CommissionId(2));
    }

    #[test]
    fn admin_sorts_by_price_and_direction() {
        let items = vec![
            item(1, CommissionStatus::Submitted, "alice", "illustration", 100.0),
            item(2, CommissionStatus::Submitted, "bob", "chibi", 250.0),
            item(3, CommissionStatus::Submitted, "carol", "icon", 25.0),
        ];

        let filter = AdminFilter {
            sort: SortKey::Price,
            ascending: true,
            ..AdminFilter::default()
        };
        let rows = project_admin_table(&items, &filter);
        let ids: Vec<i64> = rows.iter().map(|row| row.commission.id.0).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        let filter = AdminFilter {
            sort: SortKey::Price,
            ascending: false,
            ..AdminFilter::default()
        };
        let rows = project_admin_table(&items, &filter);
        let ids: Vec<i64> = rows.iter().map(|row| row.commission.id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn default_admin_sort_is_newest_first() {
        let items = vec![
            item(1, CommissionStatus::Submitted, "alice", "illustration", 100.0),
            item(2, CommissionStatus::Submitted, "bob", "chibi", 50.0),
        ];
        let rows = project_admin_table(&items, &AdminFilter::default());
        let ids: Vec<i64> = rows.iter().map(|row| row.commission.id.0).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
