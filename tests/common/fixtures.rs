/// Fixture metric names and the aggregate each one feeds.
pub const METRICS: &[(&str, &str)] = &[
    ("pod1.ecom.requests", "ecom.requests"),
    ("pod2.ecom.requests", "ecom.requests"),
    ("pod1.ecom.errors", "ecom.errors"),
];

/// Rules file exercising continue rules, drop and latency.
pub const RULES: &str = r#"# ocapi rollups
ocapi.<realm>.<tenant>.<metric> (60) c = custom1 pod[0-9]{3,6}.ecom.<realm>.<tenant>.*.*.ocapi.clients.*.<<metric>>
ocapi.all.<metric> (60) drop = sum pod[0-9]{3,6}.ecom.*.*.*.*.ocapi.clients.*.<<metric>>

delay.<metric> (60) = latency pi.*.<metric>
"#;
