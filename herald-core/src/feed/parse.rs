//! RSS 2.0 parsing with iTunes extensions.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{Episode, FeedDocument, FeedError};

const DEFAULT_FEED_TITLE: &str = "Untitled feed";
const DEFAULT_EPISODE_TITLE: &str = "Untitled episode";

#[derive(Debug, Default)]
struct RawChannel {
    title: String,
    description: String,
    itunes_image: Option<String>,
    image_url: Option<String>,
    items: Vec<RawItem>,
}

#[derive(Debug, Default)]
struct RawItem {
    guid: String,
    title: String,
    description: String,
    pub_date: String,
    link: String,
    duration: String,
    itunes_image: Option<String>,
    enclosure_url: Option<String>,
    enclosure_length: Option<String>,
    enclosure_type: Option<String>,
}

/// Parse and normalize an RSS document.
///
/// Fails when the document is not well-formed XML or has no `rss/channel`.
/// Items without a guid or an enclosure URL are dropped.
pub fn parse_feed(xml: &str) -> Result<FeedDocument, FeedError> {
    // Text is kept verbatim and trimmed during normalization, so spacing
    // next to CDATA sections survives.
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut channel: Option<RawChannel> = None;
    let mut item: Option<RawItem> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = element_name(&e);
                text.clear();

                match (name.as_str(), stack.last().map(String::as_str)) {
                    ("channel", Some("rss")) => channel = Some(RawChannel::default()),
                    ("item", Some("channel")) if channel.is_some() => {
                        item = Some(RawItem::default())
                    }
                    _ => read_attributes(&e, &name, &stack, &mut channel, &mut item),
                }

                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(&e);
                read_attributes(&e, &name, &stack, &mut channel, &mut item);
            }
            Ok(Event::Text(e)) => match e.unescape() {
                Ok(value) => text.push_str(&value),
                Err(_) => text.push_str(&String::from_utf8_lossy(&e)),
            },
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Ok(Event::End(_)) => {
                let value = std::mem::take(&mut text);
                let Some(name) = stack.pop() else { continue };
                let parent = stack.last().map(String::as_str);
                let grandparent = stack.len().checked_sub(2).map(|i| stack[i].as_str());

                match (parent, name.as_str()) {
                    (Some("channel"), "item") => {
                        if let (Some(channel), Some(done)) = (channel.as_mut(), item.take()) {
                            channel.items.push(done);
                        }
                    }
                    (Some("item"), field) => {
                        if let Some(item) = item.as_mut() {
                            match field {
                                "guid" => item.guid = value,
                                "title" => item.title = value,
                                "description" => item.description = value,
                                "pubDate" => item.pub_date = value,
                                "link" => item.link = value,
                                "itunes:duration" => item.duration = value,
                                _ => {}
                            }
                        }
                    }
                    (Some("channel"), field) => {
                        if let Some(channel) = channel.as_mut() {
                            match field {
                                "title" => channel.title = value,
                                "description" => channel.description = value,
                                _ => {}
                            }
                        }
                    }
                    (Some("image"), "url") if grandparent == Some("channel") => {
                        if let Some(channel) = channel.as_mut() {
                            channel.image_url = Some(value);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FeedError::Parse {
                    message: format!(
                        "malformed XML at position {}: {}",
                        reader.buffer_position(),
                        e
                    ),
                });
            }
            _ => {}
        }
    }

    let channel = channel.ok_or_else(|| FeedError::Parse {
        message: "document has no rss/channel element".to_string(),
    })?;

    Ok(normalize(channel))
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
}

/// Pick up the attribute-carried fields (`itunes:image`, `enclosure`).
fn read_attributes(
    e: &BytesStart<'_>,
    name: &str,
    stack: &[String],
    channel: &mut Option<RawChannel>,
    item: &mut Option<RawItem>,
) {
    match (stack.last().map(String::as_str), name) {
        (Some("item"), "itunes:image") => {
            if let Some(item) = item.as_mut() {
                item.itunes_image = attribute(e, "href");
            }
        }
        (Some("item"), "enclosure") => {
            if let Some(item) = item.as_mut() {
                item.enclosure_url = attribute(e, "url");
                item.enclosure_length = attribute(e, "length");
                item.enclosure_type = attribute(e, "type");
            }
        }
        (Some("channel"), "itunes:image") => {
            if let Some(channel) = channel.as_mut() {
                channel.itunes_image = attribute(e, "href");
            }
        }
        _ => {}
    }
}

fn normalize(channel: RawChannel) -> FeedDocument {
    let title = non_empty(&channel.title).unwrap_or(DEFAULT_FEED_TITLE).to_string();
    let description = channel.description.trim().to_string();
    let image = channel
        .itunes_image
        .as_deref()
        .and_then(non_empty)
        .or_else(|| channel.image_url.as_deref().and_then(non_empty))
        .unwrap_or_default()
        .to_string();

    let episodes = channel
        .items
        .into_iter()
        .map(|item| normalize_item(item, &image, &title))
        .filter(|ep| !ep.guid.is_empty() && !ep.enclosure_url.is_empty())
        .collect();

    FeedDocument {
        title,
        description,
        image,
        episodes,
    }
}

fn normalize_item(item: RawItem, channel_image: &str, channel_title: &str) -> Episode {
    let image = item
        .itunes_image
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(channel_image);

    let description = item.description.trim();
    let description = if description == channel_title {
        ""
    } else {
        description
    };

    let seconds = parse_duration(&item.duration);

    Episode {
        guid: item.guid.trim().to_string(),
        title: non_empty(&item.title)
            .unwrap_or(DEFAULT_EPISODE_TITLE)
            .to_string(),
        description: description.to_string(),
        published_at: parse_pub_date(&item.pub_date),
        image: strip_query(image).to_string(),
        enclosure_url: item.enclosure_url.unwrap_or_default(),
        enclosure_length: item
            .enclosure_length
            .as_deref()
            .map(leading_integer)
            .unwrap_or(0),
        enclosure_type: item.enclosure_type.unwrap_or_default(),
        runtime: (seconds > 0).then(|| format_runtime(seconds)),
        link: item.link.trim().to_string(),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

/// Leading decimal digits of `value`, or 0.
fn leading_integer(value: &str) -> u64 {
    let value = value.trim();
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().unwrap_or(0)
}

/// Duration in seconds from `SECONDS`, `MM:SS` or `HH:MM:SS`.
fn parse_duration(value: &str) -> u64 {
    let value = value.trim();
    if !value.contains(':') {
        return leading_integer(value);
    }

    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() > 3 {
        return 0;
    }
    parts
        .iter()
        .try_fold(0u64, |acc, part| {
            let v = part.trim().parse::<u64>().ok()?;
            acc.checked_mul(60)?.checked_add(v)
        })
        .unwrap_or(0)
}

fn format_runtime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

fn parse_pub_date(value: &str) -> DateTime<Utc> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
