use std::{
    collections::HashSet,
    fmt::{Display, Formatter},
    net::IpAddr,
    time::Duration,
};
use tokio::sync::watch;
use tokio::{time, time::MissedTickBehavior};
use tracing::{error, info, warn};
use crate::{
    dns::{record, Provider, RecordType},
    gateway::Resolver,
};

/// Keeps the records of every configured domain pointing at the WAN IP.
#[derive(Debug)]
pub struct Updater<D: Provider, R: Resolver> {
    provider: D,
    resolver: R,

    domains: Vec<String>,
    record_types: Option<HashSet<RecordType>>,
    fail_fast: bool,
}

impl<D: Provider, R: Resolver> Updater<D, R> {
    pub fn new(provider: D, resolver: R, domains: Vec<String>) -> Self {
        Self {
            provider,
            resolver,
            domains,
            record_types: None,
            fail_fast: false,
        }
    }

    pub fn record_types_mut(&mut self) -> &mut Option<HashSet<RecordType>> { &mut self.record_types }

    pub fn fail_fast_mut(&mut self) -> &mut bool { &mut self.fail_fast }

    /// Runs a cycle every `update_interval` until `shutdown` turns true.
    ///
    /// Failed cycles are logged and the next one runs on schedule, unless
    /// fail-fast is set, in which case the first failure is returned.
    pub async fn run(
        &self,
        update_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), CycleError<D::Error, R::Error>> {
        let mut interval = time::interval(update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => {
                    info!("shutdown requested, stopping");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            let timeout = time::timeout(update_interval, self.run_once()).await;
            let err = match timeout {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => e,
                Err(_) => CycleError::TimedOut,
            };

            if self.fail_fast {
                return Err(err);
            }
            error!("reconciliation cycle failed: {}", err);
        }
    }

    /// Resolves the WAN IP once and reconciles every domain with it.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_once(&self) -> Result<CycleReport<D::Error>, CycleError<D::Error, R::Error>> {
        let wan_ip = self.resolver.wan_ip()
            .await
            .map_err(CycleError::Resolution)?;
        info!("WAN IP: {}", wan_ip);

        let mut report = CycleReport {
            outcomes: Vec::with_capacity(self.domains.len()),
            failures: Vec::new(),
        };

        for domain in &self.domains {
            match self.reconcile(domain, wan_ip).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(error) if self.fail_fast => {
                    return Err(CycleError::Domain { domain: domain.clone(), error });
                }
                Err(error) => {
                    error!(domain = %domain, "failed to reconcile domain: {}", error);
                    report.failures.push(DomainFailure { domain: domain.clone(), error });
                }
            }
        }

        if report.is_success() {
            info!(
                checked = report.outcomes.len(),
                updated = report.updated(),
                "reconciliation cycle complete"
            );
        } else {
            warn!(
                failed = ?report.failed_domains(),
                "{} of {} domains could not be reconciled",
                report.failures.len(),
                self.domains.len()
            );
        }

        Ok(report)
    }

    #[tracing::instrument(skip(self), level = "info")]
    async fn reconcile(&self, domain: &str, wan_ip: IpAddr) -> Result<Outcome, DomainError<D::Error>> {
        info!("checking domain {}", domain);

        let records = self.provider.list_records(domain)
            .await
            .map_err(DomainError::Retrieval)?;
        let published_ip = record::published_ip(&records, &wan_ip)
            .map_err(DomainError::Extraction)?
            .to_owned();

        // Compare addresses rather than text so "2001:DB8::1" matches "2001:db8::1".
        let changed = published_ip.parse::<IpAddr>().map_or(true, |ip| ip != wan_ip);

        if changed {
            info!("the IP address for domain {} must be updated ({})", domain, published_ip);
            let updated = record::replace_ip(
                &records,
                &published_ip,
                &wan_ip.to_string(),
                self.record_types.as_ref(),
            );
            self.provider.replace_records(domain, &updated)
                .await
                .map_err(DomainError::Write)?;
        } else {
            info!("the IP address configured for domain {} is valid: {}", domain, published_ip);
        }

        Ok(Outcome {
            domain: domain.to_owned(),
            published_ip,
            wan_ip,
            changed,
        })
    }
}

/// Resolves once `shutdown` holds true. Never resolves if the sender is gone
/// without having asked for a shutdown.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub domain: String,
    pub published_ip: String,
    pub wan_ip: IpAddr,
    pub changed: bool,
}

#[derive(Debug)]
pub struct DomainFailure<E> {
    pub domain: String,
    pub error: DomainError<E>,
}

#[derive(Debug)]
pub struct CycleReport<E> {
    pub outcomes: Vec<Outcome>,
    pub failures: Vec<DomainFailure<E>>,
}

impl<E> CycleReport<E> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn updated(&self) -> usize {
        self.outcomes.iter().filter(|o| o.changed).count()
    }

    pub fn failed_domains(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.domain.as_str()).collect()
    }
}

/// Why a single domain could not be reconciled.
#[derive(Debug)]
pub enum DomainError<E> {
    Retrieval(E),
    Extraction(record::RecordError),
    Write(E),
}

impl<E: Display> Display for DomainError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainError::Retrieval(e) => write!(f, "failed to retrieve the records: {}", e),
            DomainError::Extraction(e) => Display::fmt(e, f),
            DomainError::Write(e) => write!(f, "failed to push the updated records: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for DomainError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DomainError::Retrieval(e) | DomainError::Write(e) => Some(e),
            DomainError::Extraction(e) => Some(e),
        }
    }
}

#[derive(Debug)]
pub enum CycleError<P, G> {
    Resolution(G),
    Domain { domain: String, error: DomainError<P> },
    TimedOut,
}

impl<P: Display, G: Display> Display for CycleError<P, G> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::Resolution(e) => write!(f, "failed to resolve the WAN IP: {}", e),
            CycleError::Domain { domain, error } => write!(f, "domain {}: {}", domain, error),
            CycleError::TimedOut => f.write_str("reconciliation cycle timed out"),
        }
    }
}

impl<P, G> std::error::Error for CycleError<P, G>
where
    P: std::error::Error + 'static,
    G: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CycleError::Resolution(e) => Some(e),
            CycleError::Domain { error, .. } => Some(error),
            CycleError::TimedOut => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use crate::dns::{MockProvider, Record};
    use crate::gateway::{MockResolver, WanIpSource};
    use super::*;

    fn record(name: &str, r#type: RecordType, values: &[&str]) -> Record {
        Record {
            name: name.to_owned(),
            r#type: r#type.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
            ttl: Some(10800),
        }
    }

    fn zone() -> Vec<Record> {
        vec![
            record("@", RecordType::A, &["1.2.3.4"]),
            record("www", RecordType::A, &["1.2.3.4"]),
            record("@", RecordType::TXT, &["1.2.3.4"]),
            record("@", RecordType::MX, &["10 spool.mail.gandi.net."]),
        ]
    }

    fn resolver(ip: &str) -> MockResolver {
        let ip: IpAddr = ip.parse().unwrap();
        let mut resolver = MockResolver::new();
        resolver.expect_wan_ip().times(1).returning(move || Ok(ip));
        resolver
    }

    fn failure(kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, "registrar unavailable")
    }

    #[tokio::test]
    async fn valid_record_is_left_alone() {
        let mut provider = MockProvider::new();
        provider.expect_list_records()
            .withf(|domain| domain == "example.com")
            .times(1)
            .returning(|_| Ok(zone()));
        provider.expect_replace_records().never();

        let updater = Updater::new(provider, resolver("1.2.3.4"), vec!["example.com".into()]);
        let report = updater.run_once().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.outcomes, vec![Outcome {
            domain: "example.com".into(),
            published_ip: "1.2.3.4".into(),
            wan_ip: "1.2.3.4".parse().unwrap(),
            changed: false,
        }]);
    }

    #[tokio::test]
    async fn stale_record_is_rewritten_for_allowed_types() {
        let expected = vec![
            record("@", RecordType::A, &["5.6.7.8"]),
            record("www", RecordType::A, &["5.6.7.8"]),
            record("@", RecordType::TXT, &["1.2.3.4"]),
            record("@", RecordType::MX, &["10 spool.mail.gandi.net."]),
        ];

        let mut provider = MockProvider::new();
        provider.expect_list_records()
            .times(1)
            .returning(|_| Ok(zone()));
        provider.expect_replace_records()
            .withf(move |domain, records| domain == "example.com" && records == expected.as_slice())
            .times(1)
            .returning(|_, _| Ok(()));

        let mut updater = Updater::new(provider, resolver("5.6.7.8"), vec!["example.com".into()]);
        *updater.record_types_mut() = Some(HashSet::from([RecordType::A]));
        let report = updater.run_once().await.unwrap();

        assert_eq!(report.updated(), 1);
        assert_eq!(report.outcomes[0].published_ip, "1.2.3.4");
    }

    #[tokio::test]
    async fn aaaa_record_listed_first_is_left_alone() {
        let listed = vec![
            record("www", RecordType::AAAA, &["2001:db8::1"]),
            record("www", RecordType::A, &["1.2.3.4"]),
        ];
        let expected = vec![
            record("www", RecordType::AAAA, &["2001:db8::1"]),
            record("www", RecordType::A, &["5.6.7.8"]),
        ];

        let mut provider = MockProvider::new();
        provider.expect_list_records()
            .times(1)
            .returning(move |_| Ok(listed.clone()));
        provider.expect_replace_records()
            .withf(move |_, records| records == expected.as_slice())
            .times(1)
            .returning(|_, _| Ok(()));

        let source = WanIpSource::Fixed("5.6.7.8".parse().unwrap());
        let updater = Updater::new(provider, source, vec!["example.com".into()]);
        let report = updater.run_once().await.unwrap();

        assert_eq!(report.outcomes[0].published_ip, "1.2.3.4");
        assert!(report.outcomes[0].changed);
    }

    #[tokio::test]
    async fn unresolved_wan_ip_skips_the_registrar() {
        let mut resolver = MockResolver::new();
        resolver.expect_wan_ip()
            .times(1)
            .returning(|| Err(failure(io::ErrorKind::ConnectionRefused)));
        let mut provider = MockProvider::new();
        provider.expect_list_records().never();
        provider.expect_replace_records().never();

        let updater = Updater::new(provider, resolver, vec!["example.com".into(), "example.org".into()]);
        let err = updater.run_once().await.unwrap_err();

        assert!(matches!(err, CycleError::Resolution(_)));
    }

    #[tokio::test]
    async fn fixed_ip_is_used_as_wan_ip() {
        let mut provider = MockProvider::new();
        provider.expect_list_records()
            .times(1)
            .returning(|_| Ok(zone()));
        provider.expect_replace_records()
            .withf(|_, records| records[1].values == vec!["9.9.9.9"])
            .times(1)
            .returning(|_, _| Ok(()));

        let source = WanIpSource::Fixed("9.9.9.9".parse().unwrap());
        let updater = Updater::new(provider, source, vec!["example.com".into()]);
        let report = updater.run_once().await.unwrap();

        assert_eq!(report.outcomes[0].wan_ip, "9.9.9.9".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn failing_domain_does_not_stop_the_others() {
        let mut provider = MockProvider::new();
        provider.expect_list_records()
            .withf(|domain| domain == "broken.com")
            .times(1)
            .returning(|_| Err(failure(io::ErrorKind::TimedOut)));
        provider.expect_list_records()
            .withf(|domain| domain == "no-www.com")
            .times(1)
            .returning(|_| Ok(vec![record("@", RecordType::A, &["1.2.3.4"])]));
        provider.expect_list_records()
            .withf(|domain| domain == "example.com")
            .times(1)
            .returning(|_| Ok(zone()));
        provider.expect_replace_records()
            .withf(|domain, _| domain == "example.com")
            .times(1)
            .returning(|_, _| Ok(()));

        let domains = vec!["broken.com".into(), "no-www.com".into(), "example.com".into()];
        let updater = Updater::new(provider, resolver("5.6.7.8"), domains);
        let report = updater.run_once().await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed_domains(), vec!["broken.com", "no-www.com"]);
        assert!(matches!(report.failures[0].error, DomainError::Retrieval(_)));
        assert!(matches!(
            report.failures[1].error,
            DomainError::Extraction(record::RecordError::NoWwwRecord(RecordType::A))
        ));
        assert_eq!(report.updated(), 1);
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let mut provider = MockProvider::new();
        provider.expect_list_records()
            .returning(|_| Ok(zone()));
        provider.expect_replace_records()
            .times(1)
            .returning(|_, _| Err(failure(io::ErrorKind::PermissionDenied)));

        let updater = Updater::new(provider, resolver("5.6.7.8"), vec!["example.com".into()]);
        let report = updater.run_once().await.unwrap();

        assert!(matches!(report.failures[0].error, DomainError::Write(_)));
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_failure() {
        let mut provider = MockProvider::new();
        provider.expect_list_records()
            .withf(|domain| domain == "broken.com")
            .times(1)
            .returning(|_| Err(failure(io::ErrorKind::TimedOut)));
        provider.expect_list_records()
            .withf(|domain| domain == "example.com")
            .never();

        let domains = vec!["broken.com".into(), "example.com".into()];
        let mut updater = Updater::new(provider, resolver("5.6.7.8"), domains);
        *updater.fail_fast_mut() = true;
        let err = updater.run_once().await.unwrap_err();

        assert!(matches!(
            err,
            CycleError::Domain { ref domain, error: DomainError::Retrieval(_) } if domain == "broken.com"
        ));
    }

    #[tokio::test]
    async fn daemon_stops_while_sleeping() {
        let mut provider = MockProvider::new();
        provider.expect_list_records()
            .times(1)
            .returning(|_| Ok(zone()));

        let updater = Updater::new(provider, resolver("1.2.3.4"), vec!["example.com".into()]);
        let (tx, rx) = watch::channel(false);

        let stop = async {
            time::sleep(Duration::from_millis(100)).await;
            tx.send(true).unwrap();
        };
        let (res, ()) = time::timeout(
            Duration::from_secs(5),
            async { tokio::join!(updater.run(Duration::from_secs(3600), rx), stop) },
        )
            .await
            .expect("the daemon did not stop");

        res.unwrap();
    }

    #[tokio::test]
    async fn daemon_checks_shutdown_before_cycle() {
        let mut resolver = MockResolver::new();
        resolver.expect_wan_ip().never();

        let updater = Updater::new(MockProvider::new(), resolver, vec!["example.com".into()]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        updater.run(Duration::from_secs(3600), rx).await.unwrap();
    }

    #[tokio::test]
    async fn daemon_keeps_going_after_failed_cycle() {
        let mut resolver = MockResolver::new();
        resolver.expect_wan_ip()
            .times(2..)
            .returning(|| Err(failure(io::ErrorKind::ConnectionRefused)));

        let updater = Updater::new(MockProvider::new(), resolver, vec!["example.com".into()]);
        let (tx, rx) = watch::channel(false);

        let stop = async {
            time::sleep(Duration::from_millis(250)).await;
            tx.send(true).unwrap();
        };
        let (res, ()) = tokio::join!(updater.run(Duration::from_millis(50), rx), stop);

        res.unwrap();
    }

    #[tokio::test]
    async fn daemon_fail_fast_returns_first_error() {
        let mut resolver = MockResolver::new();
        resolver.expect_wan_ip()
            .times(1)
            .returning(|| Err(failure(io::ErrorKind::ConnectionRefused)));

        let mut updater = Updater::new(MockProvider::new(), resolver, vec!["example.com".into()]);
        *updater.fail_fast_mut() = true;
        let (_tx, rx) = watch::channel(false);

        let err = updater.run(Duration::from_secs(3600), rx).await.unwrap_err();
        assert!(matches!(err, CycleError::Resolution(_)));
    }
}
