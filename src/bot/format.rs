//! Rendering of balance snapshots into chat messages.

use crate::gateway::{BalanceSnapshot, Transaction};

/// How many history entries one report shows.
pub const MAX_TRANSACTIONS_SHOWN: usize = 10;

const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━";

/// Render a full balance report: header, phone, the most recent transactions
/// (oldest of those first), a truncation note when history is longer, and
/// the available amount.
pub fn balance_report(snapshot: &BalanceSnapshot) -> String {
    let mut message = String::new();
    message.push_str("💳 Card balance\n\n");
    message.push_str(&format!("📱 Phone: {}\n\n", snapshot.phone));
    message.push_str("📊 Recent transactions:\n");
    message.push_str(DIVIDER);
    message.push_str("\n\n");

    // History arrives newest first; show the newest ten in chronological order.
    let recent: Vec<&Transaction> = snapshot
        .history
        .iter()
        .take(MAX_TRANSACTIONS_SHOWN)
        .rev()
        .collect();
    for transaction in recent {
        message.push_str(&transaction_block(transaction));
        message.push('\n');
        message.push_str(DIVIDER);
        message.push_str("\n\n");
    }

    if snapshot.history.len() > MAX_TRANSACTIONS_SHOWN {
        message.push_str(&format!(
            "... and {} more transactions\n\n",
            snapshot.history.len() - MAX_TRANSACTIONS_SHOWN
        ));
    }

    message.push_str(&format!(
        "💰 Available: {}",
        format_available(snapshot.balance.available_amount)
    ));
    message
}

/// Render one transaction: local date/time, signed amount, locations, city.
pub fn transaction_block(t: &Transaction) -> String {
    let date = t.time.format("%d.%m.%Y %H:%M");
    let location = t.location_name.join(", ");
    format!(
        "{date}\n{} ₽ | {location}\n{}",
        format_amount(t.amount),
        t.location_city
    )
}

/// Signed amount with an explicit `+` for credits.
fn format_amount(amount: f64) -> String {
    if amount > 0.0 {
        format!("+{amount}")
    } else {
        format!("{amount}")
    }
}

/// Available balance with two decimal places and a currency suffix.
pub fn format_available(amount: f64) -> String {
    format!("{amount:.2} ₽")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Balance;
    use chrono::{TimeZone, Utc};

    fn tx(amount: f64, minute: u32) -> Transaction {
        Transaction {
            time: Utc.with_ymd_and_hms(2026, 8, 1, 12, minute, 0).unwrap(),
            amount,
            location_name: vec!["Soup Place".into(), "Downtown".into()],
            location_city: "Moscow".into(),
            currency: "RUB".into(),
            mcc: "5812".into(),
            merchant_id: "m-1".into(),
            credit: amount > 0.0,
            reversal: false,
        }
    }

    fn snapshot(history: Vec<Transaction>) -> BalanceSnapshot {
        BalanceSnapshot {
            phone: "+79001234567".into(),
            balance: Balance {
                available_amount: 150.5,
            },
            history,
        }
    }

    #[test]
    fn available_amount_has_two_decimals_and_currency() {
        assert_eq!(format_available(150.5), "150.50 ₽");
        assert_eq!(format_available(0.0), "0.00 ₽");
    }

    #[test]
    fn positive_amounts_get_explicit_plus() {
        assert_eq!(format_amount(250.0), "+250");
        assert_eq!(format_amount(-250.0), "-250");
        assert_eq!(format_amount(0.0), "0");
    }

    #[test]
    fn transaction_block_layout() {
        let block = transaction_block(&tx(-250.0, 30));
        assert_eq!(block, "01.08.2026 12:30\n-250 ₽ | Soup Place, Downtown\nMoscow");
    }

    #[test]
    fn report_contains_phone_and_available() {
        let report = balance_report(&snapshot(vec![tx(-250.0, 0)]));
        assert!(report.contains("+79001234567"));
        assert!(report.contains("150.50 ₽"));
    }

    #[test]
    fn report_shows_at_most_ten_transactions() {
        let history: Vec<Transaction> = (0..15).map(|i| tx(-10.0, i)).collect();
        let report = balance_report(&snapshot(history));

        // One divider after the header plus one per shown transaction.
        let dividers = report.matches(DIVIDER).count();
        assert_eq!(dividers, 1 + MAX_TRANSACTIONS_SHOWN);
        assert!(report.contains("and 5 more transactions"));
    }

    #[test]
    fn shown_transactions_are_oldest_of_the_recent_first() {
        // History is newest first: minutes 14, 13, ..., 0.
        let history: Vec<Transaction> = (0..15).map(|i| tx(-10.0, 14 - i)).collect();
        let report = balance_report(&snapshot(history));

        // The ten newest are minutes 5..=14, displayed oldest first.
        let first = report.find("12:05").expect("minute 5 shown");
        let last = report.find("12:14").expect("minute 14 shown");
        assert!(first < last);
        assert!(!report.contains("12:04"));
    }

    #[test]
    fn short_history_has_no_truncation_note() {
        let report = balance_report(&snapshot(vec![tx(-10.0, 0), tx(20.0, 1)]));
        assert!(!report.contains("more transactions"));
        assert!(report.contains("+20 ₽"));
    }
}
