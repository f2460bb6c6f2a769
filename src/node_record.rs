//! Line-based text records used by the discovery layer. The binary framer carries these
//!  untouched as opaque payloads; parsing is simple field extraction, tolerant of
//!  malformed input (a UDP group sees foreign traffic).

/// the value following `key=`, up to the next space or end of line
pub(crate) fn extract_field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("{}=", key);
    let start = text.find(&pattern)? + pattern.len();
    let rest = &text[start..];
    let end = rest.find([' ', '\n', '\r']).unwrap_or(rest.len());
    Some(&rest[..end])
}

pub(crate) fn parse_host_port(text: &str) -> Option<(String, u16)> {
    let (host, port) = text.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

/// A node's address record: `id=<n> nm=<name> op=<host:port> app=<host:port>`, listing
///  the operational (node-to-node) and application (client-facing) endpoints.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRecord {
    pub id: u32,
    pub name: String,
    pub operational_host: String,
    pub operational_port: u16,
    pub application_host: String,
    pub application_port: u16,
    valid: bool,
}

impl NodeRecord {
    pub fn new(
        id: u32,
        name: &str,
        operational_host: &str,
        operational_port: u16,
        application_host: &str,
        application_port: u16,
    ) -> NodeRecord {
        NodeRecord {
            id,
            name: name.to_string(),
            operational_host: operational_host.to_string(),
            operational_port,
            application_host: application_host.to_string(),
            application_port,
            valid: true,
        }
    }

    /// the sentinel for text that did not parse; never constructed for valid input
    pub fn invalid() -> NodeRecord {
        NodeRecord {
            id: 0,
            name: String::new(),
            operational_host: String::new(),
            operational_port: 0,
            application_host: String::new(),
            application_port: 0,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// tolerant parse: malformed input yields the invalid sentinel, not an error
    pub fn from_text(text: &str) -> NodeRecord {
        let parsed = (|| {
            let id = extract_field(text, "id")?.parse().ok()?;
            let name = extract_field(text, "nm")?;
            let (operational_host, operational_port) = parse_host_port(extract_field(text, "op")?)?;
            let (application_host, application_port) = parse_host_port(extract_field(text, "app")?)?;

            Some(NodeRecord::new(id, name, &operational_host, operational_port, &application_host, application_port))
        })();

        parsed.unwrap_or_else(NodeRecord::invalid)
    }

    pub fn to_text(&self) -> String {
        format!("id={} nm={} op={}:{} app={}:{}",
                self.id, self.name,
                self.operational_host, self.operational_port,
                self.application_host, self.application_port)
    }
}
