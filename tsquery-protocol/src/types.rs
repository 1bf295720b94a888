//! Declared value kinds for known wire keys.
//!
//! Keys missing from the table decode as plain strings.

/// How a wire value is coerced after unescaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    StringArray,
    NumberArray,
}

/// Entity ids (`cid`, `clid`, `sid`, ...) are not listed and stay strings.
const NUMBER_KEYS: &[&str] = &[
    // error row
    "id",
    "failed_permid",
    // counters and sizes
    "permvalue",
    "reasonid",
    "targetmode",
    "build",
    "virtualserver_port",
    "virtualserver_clientsonline",
    "virtualserver_queryclientsonline",
    "virtualserver_maxclients",
    "virtualserver_uptime",
    "virtualserver_channelsonline",
    "client_type",
    "client_idle_time",
    "client_created",
    "client_lastconnected",
    "client_totalconnections",
    "client_talk_power",
    "client_unread_messages",
    "client_month_bytes_uploaded",
    "client_month_bytes_downloaded",
    "client_total_bytes_uploaded",
    "client_total_bytes_downloaded",
    "connection_connected_time",
    "connection_packetloss_total",
    "connection_ping",
    "channel_order",
    "channel_codec",
    "channel_codec_quality",
    "channel_maxclients",
    "channel_maxfamilyclients",
    "channel_needed_talk_power",
    "channel_icon_id",
    "channel_delete_delay",
    "total_clients",
    "total_clients_family",
    "seconds_empty",
    "serverinstance_uptime",
    "instance_uptime",
    "host_timestamp_utc",
    "size",
    "datetime",
];

const BOOLEAN_KEYS: &[&str] = &[
    "client_away",
    "client_input_muted",
    "client_output_muted",
    "client_outputonly_muted",
    "client_input_hardware",
    "client_output_hardware",
    "client_is_recording",
    "client_is_talker",
    "client_is_priority_speaker",
    "client_is_channel_commander",
    "channel_flag_permanent",
    "channel_flag_semi_permanent",
    "channel_flag_default",
    "channel_flag_password",
    "channel_flag_maxclients_unlimited",
    "channel_flag_maxfamilyclients_unlimited",
    "channel_flag_maxfamilyclients_inherited",
    "channel_codec_is_unencrypted",
    "virtualserver_autostart",
    "virtualserver_flag_password",
    "virtualserver_weblist_enabled",
    "permnegated",
    "permskip",
];

const STRING_ARRAY_KEYS: &[&str] = &["virtualserver_ip", "serverinstance_filetransfer_ip"];

const NUMBER_ARRAY_KEYS: &[&str] = &["client_servergroups", "cldbids"];

/// Returns the declared kind of a wire key.
pub fn kind_of(key: &str) -> ValueKind {
    if NUMBER_KEYS.contains(&key) {
        ValueKind::Number
    } else if BOOLEAN_KEYS.contains(&key) {
        ValueKind::Boolean
    } else if NUMBER_ARRAY_KEYS.contains(&key) {
        ValueKind::NumberArray
    } else if STRING_ARRAY_KEYS.contains(&key) {
        ValueKind::StringArray
    } else {
        ValueKind::String
    }
}
