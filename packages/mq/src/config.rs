use common::config::BrokerConfig;
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};

/// Build the AMQP URI for a broker config.
///
/// The struct form sidesteps percent-encoding of credentials and vhost.
pub fn amqp_uri(config: &BrokerConfig) -> AMQPUri {
    let connection_timeout_ms = config.connection_timeout().as_millis() as u64;

    AMQPUri {
        scheme: if config.tls {
            AMQPScheme::AMQPS
        } else {
            AMQPScheme::AMQP
        },
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            host: config.host.clone(),
            port: config.port,
        },
        vhost: config.virtual_host.clone(),
        query: AMQPQueryString {
            heartbeat: Some(config.heartbeat_secs),
            connection_timeout: Some(connection_timeout_ms),
            ..Default::default()
        },
    }
}
