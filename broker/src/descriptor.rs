use serde::{Deserialize, Serialize};

/// Immutable connection descriptor for one of the three supported
/// broker families. Constructed once and never mutated (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum BrokerDescriptor {
    Mqtt {
        host: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        username: Option<String>,
        password: Option<String>,
    },
    Redis {
        host: String,
        #[serde(default = "default_redis_port")]
        port: u16,
        #[serde(default)]
        db: i64,
        password: Option<String>,
    },
    Amqp {
        host: String,
        #[serde(default = "default_amqp_port")]
        port: u16,
        #[serde(default = "default_vhost")]
        vhost: String,
        #[serde(default = "default_amqp_user")]
        username: String,
        password: Option<String>,
    },
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_redis_port() -> u16 {
    6379
}

fn default_amqp_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_amqp_user() -> String {
    "guest".to_string()
}

impl BrokerDescriptor {
    /// Shorthand for an MQTT descriptor with default port and no creds.
    pub fn mqtt(host: impl Into<String>) -> Self {
        BrokerDescriptor::Mqtt {
            host: host.into(),
            port: default_mqtt_port(),
            username: None,
            password: None,
        }
    }

    /// Shorthand for a Redis descriptor on db 0 with default port.
    pub fn redis(host: impl Into<String>) -> Self {
        BrokerDescriptor::Redis {
            host: host.into(),
            port: default_redis_port(),
            db: 0,
            password: None,
        }
    }

    /// Shorthand for an AMQP descriptor with vhost "/" and user "guest".
    pub fn amqp(host: impl Into<String>) -> Self {
        BrokerDescriptor::Amqp {
            host: host.into(),
            port: default_amqp_port(),
            vhost: default_vhost(),
            username: default_amqp_user(),
            password: None,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            BrokerDescriptor::Mqtt { host, .. } => host,
            BrokerDescriptor::Redis { host, .. } => host,
            BrokerDescriptor::Amqp { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            BrokerDescriptor::Mqtt { port, .. } => *port,
            BrokerDescriptor::Redis { port, .. } => *port,
            BrokerDescriptor::Amqp { port, .. } => *port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        assert_eq!(BrokerDescriptor::mqtt("localhost").port(), 1883);
        assert_eq!(BrokerDescriptor::redis("localhost").port(), 6379);
        assert_eq!(BrokerDescriptor::amqp("localhost").port(), 5672);

        match BrokerDescriptor::redis("localhost") {
            BrokerDescriptor::Redis { db, .. } => assert_eq!(db, 0),
            _ => panic!("expected redis descriptor"),
        }
        match BrokerDescriptor::amqp("localhost") {
            BrokerDescriptor::Amqp { vhost, username, .. } => {
                assert_eq!(vhost, "/");
                assert_eq!(username, "guest");
            }
            _ => panic!("expected amqp descriptor"),
        }
    }
}
