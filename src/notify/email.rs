// src/notify/email.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{NotificationJob, Notifier};
use crate::config::SmtpSettings;

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(smtp: &SmtpSettings) -> Result<Self> {
        let creds = Credentials::new(smtp.user.clone(), smtp.pass.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
            .with_context(|| format!("invalid SMTP_HOST {}", smtp.host))?
            .credentials(creds)
            .build();
        let from = smtp
            .from
            .parse()
            .with_context(|| format!("invalid NOTIFY_EMAIL_FROM {}", smtp.from))?;
        Ok(Self { mailer, from })
    }
}

pub fn render_body(job: &NotificationJob) -> String {
    format!(
        "Industry: {}\nTitle: {}\nImpact score: {:.1}\n\n{}\n",
        job.industry, job.title, job.impact_score, job.summary
    )
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn deliver(&self, job: &NotificationJob) -> Result<()> {
        let to: Mailbox = job
            .recipient
            .parse()
            .with_context(|| format!("invalid recipient {}", job.recipient))?;

        let msg = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(job.subject.clone())
            .header(header::ContentType::TEXT_PLAIN)
            .body(render_body(job))
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_industry_title_and_score() {
        let job = NotificationJob {
            recipient: "a@x.io".into(),
            subject: "High impact (EV): Plant".into(),
            industry: "EV".into(),
            title: "Plant".into(),
            impact_score: 9.3,
            summary: "A new plant.".into(),
        };
        let body = render_body(&job);
        assert!(body.starts_with("Industry: EV\nTitle: Plant\nImpact score: 9.3"));
        assert!(body.contains("A new plant."));
    }

    #[tokio::test]
    async fn rejects_bad_sender_address() {
        let smtp = SmtpSettings {
            host: "smtp.example.com".into(),
            user: "u".into(),
            pass: "p".into(),
            from: "not an address".into(),
        };
        assert!(EmailNotifier::new(&smtp).is_err());
    }
}
