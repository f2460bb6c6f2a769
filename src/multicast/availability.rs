use crate::node_record::{extract_field, parse_host_port};

/// The discovery payload a publisher broadcasts to advertise its reachable side-channel
///  address. Line-based text rather than the binary header format, so it stays
///  inspectable on the wire:
///
/// ```ascii
/// PUB
/// nm=<publisher-name> addr=<host>:<port>
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublisherAvailability {
    pub name: String,
    pub host: String,
    pub port: u16,
    valid: bool,
}

const AVAILABILITY_TAG: &str = "PUB";

impl PublisherAvailability {
    pub fn new(name: &str, host: &str, port: u16) -> PublisherAvailability {
        PublisherAvailability {
            name: name.to_string(),
            host: host.to_string(),
            port,
            valid: true,
        }
    }

    pub fn invalid() -> PublisherAvailability {
        PublisherAvailability {
            name: String::new(),
            host: String::new(),
            port: 0,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Tolerant parse: anything not starting with the `PUB` tag, or otherwise
    ///  malformed, yields the invalid sentinel. A multicast group carries arbitrary
    ///  foreign traffic, so garbage is an expected input here, not an error.
    pub fn from_text(text: &str) -> PublisherAvailability {
        let parsed = (|| {
            let mut lines = text.lines();
            if lines.next()?.trim() != AVAILABILITY_TAG {
                return None;
            }

            let fields = lines.next()?;
            let name = extract_field(fields, "nm")?;
            let (host, port) = parse_host_port(extract_field(fields, "addr")?)?;

            Some(PublisherAvailability::new(name, &host, port))
        })();

        parsed.unwrap_or_else(PublisherAvailability::invalid)
    }

    pub fn to_text(&self) -> String {
        format!("{}\nnm={} addr={}:{}", AVAILABILITY_TAG, self.name, self.host, self.port)
    }
}
