use crate::config::NotifyConfig;
use crate::digest;
use crate::error::Result;
use crate::notifier::{Email, Mailer, SesMailer};
use crate::search::{ClubhouseClient, Search, SearchWindow};
use chrono::{NaiveDate, Utc};
use log::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub window: SearchWindow,
    pub total: i64,
    pub rendered: usize,
}

/// Builds the digest of stories due in the configured window. Nothing is sent.
pub async fn build_digest(
    config: &NotifyConfig,
    search: &impl Search,
    today: NaiveDate,
) -> Result<(Email, Report)> {
    let window = SearchWindow::from_date(today, config.days)?;
    let response = search.search(&window, &config.owner).await?;

    let email = Email {
        to: config.to_address.clone(),
        from: config.from_address.clone(),
        subject: digest::subject(config.days),
        body: digest::render(&response.stories),
    };

    let report = Report {
        window,
        total: response.total,
        rendered: response.stories.len(),
    };

    Ok((email, report))
}

/// Searches, renders and sends one digest. An empty result still sends an
/// email with an empty body.
pub async fn notify(
    config: &NotifyConfig,
    search: &impl Search,
    mailer: &impl Mailer,
    today: NaiveDate,
) -> Result<Report> {
    let (email, report) = build_digest(config, search, today).await?;
    mailer.send(&email).await?;

    info!(
        "Notified {} of {} stories due {}",
        config.to_address, report.rendered, report.window
    );
    Ok(report)
}

pub async fn run(config: &NotifyConfig, dry_run: bool) -> Result<Report> {
    let search = ClubhouseClient::new(&config.api_url, &config.api_token)?;
    let today = Utc::now().date_naive();

    if dry_run {
        let (email, report) = build_digest(config, &search, today).await?;
        info!(
            "Not sending (Dry-Run) {:?} to {}:{}",
            email.subject, email.to, email.body
        );
        return Ok(report);
    }

    let mailer = SesMailer::for_region(config.region.clone()).await;
    debug!("Using SES in {}", config.region);

    notify(config, &search, &mailer, today).await
}
