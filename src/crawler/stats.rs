//! Dashboard stats rollup.

use std::collections::HashMap;

use chrono::Utc;

use crate::models::{Mailbox, SystemStats};

/// Reduce mailboxes into the dashboard stats singleton. Inactive records
/// are historical and excluded.
pub fn aggregate_system_stats<'a, I>(mailboxes: I) -> SystemStats
where
    I: IntoIterator<Item = &'a Mailbox>,
{
    let mut total = 0u64;
    let mut commercial = 0u64;
    let mut residential = 0u64;
    let mut price_sum = 0.0f64;
    let mut by_state: HashMap<String, u64> = HashMap::new();

    for mailbox in mailboxes {
        if !mailbox.active {
            continue;
        }
        total += 1;
        price_sum += mailbox.price;
        match mailbox.rdi.as_str() {
            "Commercial" => commercial += 1,
            "Residential" => residential += 1,
            _ => {}
        }
        *by_state.entry(mailbox.address_raw.state.clone()).or_insert(0) += 1;
    }

    let avg_price = if total > 0 {
        price_sum / total as f64
    } else {
        0.0
    };

    SystemStats {
        last_updated: Some(Utc::now()),
        total_mailboxes: total,
        total_commercial: commercial,
        total_residential: residential,
        avg_price,
        by_state,
    }
}
