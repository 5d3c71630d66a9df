use crate::error::{Error, Result};
use crate::search::Story;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::warn;

/// Layout the Clubhouse API uses for story deadlines. Fractional seconds are
/// optional.
pub const DEADLINE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

const DUE_FORMAT: &str = "%Y-%m-%d %H:%M:%S +0000 UTC";

pub fn subject(days: u32) -> String {
    format!("Your Clubhouse stories due in the next {days} days")
}

pub fn parse_deadline(deadline: Option<&str>) -> Result<DateTime<Utc>> {
    let value = deadline.ok_or_else(|| Error::DateParse {
        value: String::new(),
        reason: "story has no deadline".to_string(),
    })?;

    NaiveDateTime::parse_from_str(value, DEADLINE_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|e| Error::DateParse {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Stand-in for deadlines that could not be parsed.
pub fn zero_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
        .and_utc()
}

/// Renders one paragraph per story, in the order given.
///
/// A story whose deadline cannot be parsed is still rendered, with
/// [`zero_time`] as its due date.
pub fn render(stories: &[Story]) -> String {
    let mut body = String::new();

    for story in stories {
        let deadline = parse_deadline(story.deadline.as_deref()).unwrap_or_else(|e| {
            warn!("Rendering {:?} without a due date: {e}", story.name);
            zero_time()
        });

        body.push_str(&format!(
            "\n\n{}\nLink: {}\nDue on {}\n",
            story.name,
            story.app_url.replace('\\', ""),
            deadline.format(DUE_FORMAT)
        ));
    }

    body
}
