//! XML bodies for the HTTP control surface: version/build info, job
//! submission parsing, and job status rendering. Parsing follows the
//! same small hand-rolled `quick_xml::Reader` walk the tagger's atom
//! parser uses rather than pulling in a full serde-xml crate for a
//! handful of elements.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use classifier_core::{Job, JobState};

/// `GET /classifier`: a minimal version/build-info document.
pub fn version_xml() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<classifier><version>{}</version></classifier>",
        env!("CARGO_PKG_VERSION")
    )
}

/// Extracts the training URL from a job-submission body's `<tag>`
/// element, accepting either an `href` attribute or element text.
pub fn parse_tag_url(body: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut in_tag = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if local_name(e.name().as_ref()) == "tag" => {
                if let Some(href) = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.as_ref() == b"href")
                    .and_then(|a| a.decode_and_unescape_value(reader.decoder()).ok())
                {
                    return Ok(href.into_owned());
                }
                in_tag = true;
            }
            Ok(Event::Text(t)) if in_tag => {
                let text = t.decode().map_err(|e| e.to_string())?.trim().to_string();
                if !text.is_empty() {
                    return Ok(text);
                }
            }
            Ok(Event::End(e)) if local_name(e.name().as_ref()) == "tag" => in_tag = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }
    Err("job submission body has no <tag> element".to_string())
}

fn local_name(qname: &[u8]) -> &str {
    let full = std::str::from_utf8(qname).unwrap_or("");
    full.rsplit(':').next().unwrap_or(full)
}

fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Waiting => "waiting",
        JobState::Training => "training",
        JobState::Classifying => "classifying",
        JobState::Inserting => "inserting",
        JobState::Complete => "complete",
        JobState::Cancelled => "cancelled",
        JobState::Error => "error",
    }
}

/// Renders a job's status document: `<job>` with `<id>`, `<tag-url>`,
/// `<duration type="float">`, `<progress type="float">`, `<status>`,
/// and, on `Error`, `<error-message>`.
pub fn job_status_xml(job: &Job) -> String {
    let duration_secs = job
        .completed_at
        .unwrap_or_else(chrono::Utc::now)
        .signed_duration_since(job.created_at)
        .num_milliseconds() as f64
        / 1000.0;

    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<job>\n");
    body.push_str(&format!("  <id>{}</id>\n", escape(job.id.to_string())));
    body.push_str(&format!("  <tag-url>{}</tag-url>\n", escape(job.tag_url.clone())));
    body.push_str(&format!("  <duration type=\"float\">{duration_secs}</duration>\n"));
    body.push_str(&format!(
        "  <progress type=\"float\">{}</progress>\n",
        job.progress
    ));
    body.push_str(&format!("  <status>{}</status>\n", state_label(job.state)));
    if let Some(message) = &job.error_message {
        body.push_str(&format!("  <error-message>{}</error-message>\n", escape(message.clone())));
    }
    body.push_str("</job>");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use classifier_core::{EntityIdType, ItemScope, JobId};

    #[test]
    fn parses_tag_url_from_href_attribute() {
        let body = r#"<job><tag href="http://example.com/tags/1.atom"/></job>"#;
        assert_eq!(parse_tag_url(body).unwrap(), "http://example.com/tags/1.atom");
    }

    #[test]
    fn parses_tag_url_from_element_text() {
        let body = "<job><tag>http://example.com/tags/1.atom</tag></job>";
        assert_eq!(parse_tag_url(body).unwrap(), "http://example.com/tags/1.atom");
    }

    #[test]
    fn missing_tag_element_is_an_error() {
        let body = "<job></job>";
        assert!(parse_tag_url(body).is_err());
    }

    #[test]
    fn status_xml_includes_error_message_only_when_present() {
        let mut job = Job::new(JobId::now_v7(), "http://example.com/tags/1.atom", ItemScope::All, Utc::now());
        let rendered = job_status_xml(&job);
        assert!(!rendered.contains("error-message"));

        job.state = JobState::Error;
        job.error_message = Some("boom".to_string());
        let rendered = job_status_xml(&job);
        assert!(rendered.contains("<error-message>boom</error-message>"));
        assert!(rendered.contains("<status>error</status>"));
    }
}
