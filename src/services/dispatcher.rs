use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::models::{Destination, DispatchResult, Record};
use crate::services::webhook::{SheetWebhook, SheetWrite};

/// Splits a comma separated sheet list into destinations.
///
/// Names are trimmed, blanks dropped, duplicates kept. An absent or blank
/// list yields the single default destination.
pub fn parse_destinations(sheet_names: Option<&str>) -> Vec<Destination> {
    let destinations: Vec<Destination> = sheet_names
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Destination::named)
        .collect();

    if destinations.is_empty() {
        vec![Destination::default_sheet()]
    } else {
        destinations
    }
}

pub struct Dispatcher {
    webhook: Arc<dyn SheetWebhook>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(webhook: Arc<dyn SheetWebhook>, concurrency: usize) -> Self {
        Self {
            webhook,
            concurrency: concurrency.max(1),
        }
    }

    /// Writes every record to every destination.
    ///
    /// Results come back record-major, destination-minor, one per pair. A failed
    /// write is recorded on its own result and does not stop the others. Writes
    /// of the same IMEI to the same sheet never overlap; they run one after
    /// another in request order.
    pub async fn dispatch(
        &self,
        records: &[Record],
        destinations: &[Destination],
        overwrite: bool,
    ) -> Vec<DispatchResult> {
        let start = Instant::now();
        let pairs = records.iter().flat_map(|record| {
            destinations
                .iter()
                .map(move |dest| (record.clone(), dest.clone()))
        });

        let mut chains: Vec<Vec<(usize, Record, Destination)>> = Vec::new();
        let mut chain_by_key: HashMap<(String, Destination), usize> = HashMap::new();
        let mut total = 0;
        for (index, (record, destination)) in pairs.enumerate() {
            let key = (record.imei.clone(), destination.clone());
            let chain = *chain_by_key.entry(key).or_insert_with(|| {
                chains.push(Vec::new());
                chains.len() - 1
            });
            chains[chain].push((index, record, destination));
            total += 1;
        }

        // up to `concurrency` chains in flight; each result goes back to its pair's slot
        let finished: Vec<Vec<(usize, DispatchResult)>> = stream::iter(chains)
            .map(|chain| self.dispatch_chain(chain, overwrite))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        let mut slots: Vec<Option<DispatchResult>> = (0..total).map(|_| None).collect();
        for (index, result) in finished.into_iter().flatten() {
            slots[index] = Some(result);
        }
        let results: Vec<DispatchResult> = slots.into_iter().flatten().collect();

        let failed = results.iter().filter(|r| !r.delivered).count();
        info!(
            records = records.len(),
            destinations = destinations.len(),
            writes = total,
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatch finished"
        );

        results
    }

    async fn dispatch_chain(
        &self,
        chain: Vec<(usize, Record, Destination)>,
        overwrite: bool,
    ) -> Vec<(usize, DispatchResult)> {
        let mut results = Vec::with_capacity(chain.len());
        for (index, record, destination) in chain {
            results.push((index, self.dispatch_one(record, destination, overwrite).await));
        }
        results
    }

    async fn dispatch_one(
        &self,
        record: Record,
        destination: Destination,
        overwrite: bool,
    ) -> DispatchResult {
        let write = SheetWrite {
            imei: record.imei.clone(),
            name: record.name.clone(),
            sheet_name: destination.as_str().to_string(),
            overwrite,
        };

        match self.webhook.submit(&write).await {
            Ok(status) => DispatchResult::delivered(&record, &destination, status),
            Err(e) => {
                warn!(
                    imei = %record.imei,
                    sheet_name = %destination.as_str(),
                    error = %e,
                    "Sheet write failed"
                );
                DispatchResult::failed(&record, &destination, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::services::webhook::MockSheetWebhook;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    type Delay = Box<dyn Fn(&SheetWrite) -> Duration + Send + Sync>;

    /// Sleeps per write and keeps track of what overlapped.
    struct SlowWebhook {
        delay: Delay,
        in_flight: Mutex<HashMap<(String, String), usize>>,
        active: Mutex<usize>,
        max_same_key: Mutex<usize>,
        max_active: Mutex<usize>,
        completed: Mutex<Vec<(String, String)>>,
    }

    impl SlowWebhook {
        fn new(delay: impl Fn(&SheetWrite) -> Duration + Send + Sync + 'static) -> Self {
            Self {
                delay: Box::new(delay),
                in_flight: Mutex::new(HashMap::new()),
                active: Mutex::new(0),
                max_same_key: Mutex::new(0),
                max_active: Mutex::new(0),
                completed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SheetWebhook for SlowWebhook {
        async fn submit(&self, write: &SheetWrite) -> AppResult<String> {
            let key = (write.imei.clone(), write.sheet_name.clone());
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                let same_key = in_flight.entry(key.clone()).or_insert(0);
                *same_key += 1;
                let mut max_same_key = self.max_same_key.lock().unwrap();
                *max_same_key = (*max_same_key).max(*same_key);

                let mut active = self.active.lock().unwrap();
                *active += 1;
                let mut max_active = self.max_active.lock().unwrap();
                *max_active = (*max_active).max(*active);
            }

            tokio::time::sleep((self.delay)(write)).await;

            {
                *self.in_flight.lock().unwrap().get_mut(&key).unwrap() -= 1;
                *self.active.lock().unwrap() -= 1;
                self.completed.lock().unwrap().push(key);
            }
            Ok(format!("saved {} to '{}'", write.imei, write.sheet_name))
        }
    }

    fn result_order(results: &[DispatchResult]) -> Vec<(String, String)> {
        results
            .iter()
            .map(|r| (r.imei.clone(), r.sheet_name.as_str().to_string()))
            .collect()
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("35523485043320{}", i), format!("Site {}", i)))
            .collect()
    }

    fn echo_webhook() -> MockSheetWebhook {
        let mut webhook = MockSheetWebhook::new();
        webhook
            .expect_submit()
            .returning(|w| Ok(format!("saved {} to '{}'", w.imei, w.sheet_name)));
        webhook
    }

    #[test]
    fn test_parse_destinations_default() {
        assert_eq!(parse_destinations(None), vec![Destination::default_sheet()]);
        assert_eq!(parse_destinations(Some("")), vec![Destination::default_sheet()]);
        assert_eq!(parse_destinations(Some(" , ")), vec![Destination::default_sheet()]);
    }

    #[test]
    fn test_parse_destinations_trims_and_keeps_duplicates() {
        assert_eq!(
            parse_destinations(Some("Sales, Sales ")),
            vec![Destination::named("Sales"), Destination::named("Sales")]
        );
        assert_eq!(
            parse_destinations(Some("Nairobi,,Mombasa")),
            vec![Destination::named("Nairobi"), Destination::named("Mombasa")]
        );
    }

    #[tokio::test]
    async fn test_cross_product_record_major() {
        let dispatcher = Dispatcher::new(Arc::new(echo_webhook()), 3);
        let records = records(3);
        let destinations = vec![Destination::named("A"), Destination::named("B")];

        let results = dispatcher.dispatch(&records, &destinations, false).await;

        assert_eq!(results.len(), 6);
        let order: Vec<(String, String)> = results
            .iter()
            .map(|r| (r.imei.clone(), r.sheet_name.as_str().to_string()))
            .collect();
        let expected: Vec<(String, String)> = records
            .iter()
            .flat_map(|r| {
                ["A", "B"]
                    .iter()
                    .map(move |d| (r.imei.clone(), d.to_string()))
            })
            .collect();
        assert_eq!(order, expected);
        let unique: HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), 6);
        assert!(results.iter().all(|r| r.delivered));
        assert_eq!(results[0].status, "saved 355234850433200 to 'A'");
    }

    #[tokio::test]
    async fn test_overwrite_and_default_sheet_passed_through() {
        let mut webhook = MockSheetWebhook::new();
        webhook
            .expect_submit()
            .withf(|w| w.overwrite && w.sheet_name.is_empty() && w.name == "Site 0")
            .times(1)
            .returning(|_| Ok("ok".to_string()));

        let dispatcher = Dispatcher::new(Arc::new(webhook), 1);
        let results = dispatcher
            .dispatch(&records(1), &parse_destinations(None), true)
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, "ok");
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_siblings() {
        let mut webhook = MockSheetWebhook::new();
        webhook.expect_submit().times(4).returning(|w| {
            if w.imei.ends_with('0') && w.sheet_name == "B" {
                Err(AppError::dispatch("connection reset"))
            } else {
                Ok("ok".to_string())
            }
        });

        let dispatcher = Dispatcher::new(Arc::new(webhook), 2);
        let destinations = vec![Destination::named("A"), Destination::named("B")];
        let results = dispatcher.dispatch(&records(2), &destinations, false).await;

        assert_eq!(results.len(), 4);
        assert!(!results[1].delivered);
        assert!(results[1].status.contains("connection reset"));
        assert_eq!(results.iter().filter(|r| r.delivered).count(), 3);
    }

    #[tokio::test]
    async fn test_order_kept_when_earlier_writes_are_slower() {
        // the first pair sleeps longest, the last one not at all
        let webhook = Arc::new(SlowWebhook::new(|w| {
            let record: u64 = w.imei[w.imei.len() - 1..].parse().unwrap();
            let position = record * 2 + u64::from(w.sheet_name == "B");
            Duration::from_millis((5 - position) * 20)
        }));
        let dispatcher = Dispatcher::new(webhook.clone(), 6);
        let records = records(3);
        let destinations = vec![Destination::named("A"), Destination::named("B")];

        let results = dispatcher.dispatch(&records, &destinations, false).await;

        let expected: Vec<(String, String)> = records
            .iter()
            .flat_map(|r| {
                ["A", "B"]
                    .iter()
                    .map(move |d| (r.imei.clone(), d.to_string()))
            })
            .collect();
        assert_eq!(result_order(&results), expected);
        assert_eq!(results[0].status, "saved 355234850433200 to 'A'");

        let completed = webhook.completed.lock().unwrap().clone();
        assert_eq!(completed.first(), expected.last());
        assert_eq!(*webhook.max_active.lock().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_same_imei_and_sheet_never_overlap() {
        let webhook = Arc::new(SlowWebhook::new(|_| Duration::from_millis(20)));
        let dispatcher = Dispatcher::new(webhook.clone(), 4);
        let site = records(2);
        // a repeated record and a repeated sheet name
        let records = vec![site[0].clone(), site[0].clone(), site[1].clone()];
        let destinations = parse_destinations(Some("Sales, Sales "));

        let results = dispatcher.dispatch(&records, &destinations, true).await;

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.delivered));
        let imeis: Vec<&str> = results.iter().map(|r| r.imei.as_str()).collect();
        assert_eq!(
            imeis,
            vec![
                "355234850433200",
                "355234850433200",
                "355234850433200",
                "355234850433200",
                "355234850433201",
                "355234850433201",
            ]
        );
        assert_eq!(*webhook.max_same_key.lock().unwrap(), 1);
        // distinct keys still run side by side
        assert_eq!(*webhook.max_active.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_no_records_no_writes() {
        let mut webhook = MockSheetWebhook::new();
        webhook.expect_submit().times(0);

        let dispatcher = Dispatcher::new(Arc::new(webhook), 4);
        let results = dispatcher
            .dispatch(&[], &[Destination::default_sheet()], false)
            .await;
        assert!(results.is_empty());
    }
}
