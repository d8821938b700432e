use serde::{Deserialize, Serialize};

/// Delivery channel selected by the `type` field of an incoming request.
///
/// `Update` and `Urgent` both deliver over email but resolve against
/// different opt-in columns and carry different subject lines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Update,
    Urgent,
    Push,
    Sms,
    WhatsApp,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Update => "update",
            ChannelKind::Urgent => "urgent",
            ChannelKind::Push => "push",
            ChannelKind::Sms => "sms",
            ChannelKind::WhatsApp => "whatsapp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "update" => Some(ChannelKind::Update),
            "urgent" => Some(ChannelKind::Urgent),
            "push" => Some(ChannelKind::Push),
            "sms" => Some(ChannelKind::Sms),
            "whatsapp" => Some(ChannelKind::WhatsApp),
            _ => None,
        }
    }

    /// Which kind of address this channel expects in recipient rows.
    pub fn address_kind(&self) -> AddressKind {
        match self {
            ChannelKind::Update | ChannelKind::Urgent => AddressKind::Email,
            ChannelKind::Sms | ChannelKind::WhatsApp => AddressKind::Phone,
            ChannelKind::Push => AddressKind::PushEndpoint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Email,
    Phone,
    PushEndpoint,
}

/// One eligible recipient produced by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: i64,
    pub display_name: String,
    pub address: String,
}

/// An incoming dispatch request, after validation.
///
/// The wire format accepts legacy aliases (`content` for the body,
/// `date` for the label); see `server::DispatchBody`.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub title: String,
    pub body_html: String,
    pub timestamp_label: String,
    pub channel: ChannelKind,
}

/// Content handed to a sender, derived from a `DispatchRequest`.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl OutboundMessage {
    pub fn from_request(req: &DispatchRequest) -> Self {
        let subject = match req.channel {
            ChannelKind::Urgent => {
                format!("URGENT Prayer Request \u{2014} {}", req.timestamp_label)
            }
            _ => format!("Prayer Diary Update \u{2014} {}", req.timestamp_label),
        };
        Self {
            subject,
            html: req.body_html.clone(),
            text: format!("{}\n\n{}", req.title, strip_tags(&req.body_html)),
        }
    }
}

/// Rough HTML-to-text conversion for the plain-text channels.
/// Drops tags and collapses runs of whitespace; entities are left alone.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    let mut collapsed = String::with_capacity(out.len());
    let mut last_space = false;
    for ch in out.chars() {
        if ch.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
            }
            last_space = true;
        } else {
            collapsed.push(ch);
            last_space = false;
        }
    }
    collapsed.trim().to_string()
}

/// A send failure recorded against one batch; never aborts the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchError {
    pub batch_index: usize,
    pub message: String,
}

/// Summary returned by every dispatch run once resolution has succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchResult {
    pub total_recipients: usize,
    pub successful_deliveries: usize,
    pub batch_count: usize,
    pub errors: Vec<BatchError>,
    pub cancelled: bool,
}
