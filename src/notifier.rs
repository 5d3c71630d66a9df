use crate::error::{Error, Result};
use aws_config::ConfigLoader;
use aws_sdk_sesv2::Client;
use aws_sdk_sesv2::config::Region;
use aws_sdk_sesv2::error::DisplayErrorContext;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use log::{debug, info};
use std::future::Future;

const CHARSET: &str = "UTF-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer {
    fn send(&self, email: &Email) -> impl Future<Output = Result<()>> + Send;
}

/// Sends plain-text mail through Amazon SES.
#[derive(Debug, Clone)]
pub struct SesMailer {
    client: Client,
}

impl SesMailer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn for_region(region: impl Into<String>) -> Self {
        let aws_config = ConfigLoader::default()
            .region(Region::new(region.into()))
            .load()
            .await;

        Self::new(Client::new(&aws_config))
    }
}

fn text(data: &str) -> Result<Content> {
    Content::builder()
        .data(data)
        .charset(CHARSET)
        .build()
        .map_err(|e| Error::Dispatch(e.to_string()))
}

fn email_content(email: &Email) -> Result<EmailContent> {
    let message = Message::builder()
        .subject(text(&email.subject)?)
        .body(Body::builder().text(text(&email.body)?).build())
        .build();

    Ok(EmailContent::builder().simple(message).build())
}

impl Mailer for SesMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        debug!("Sending {:?} from {} to {}", email.subject, email.from, email.to);

        let output = self
            .client
            .send_email()
            .from_email_address(&email.from)
            .reply_to_addresses(&email.from)
            .destination(Destination::builder().to_addresses(&email.to).build())
            .content(email_content(email)?)
            .send()
            .await
            .map_err(|e| Error::Dispatch(DisplayErrorContext(&e).to_string()))?;

        info!(
            "Sent digest to {} (message id {})",
            email.to,
            output.message_id().unwrap_or("unknown")
        );

        Ok(())
    }
}
