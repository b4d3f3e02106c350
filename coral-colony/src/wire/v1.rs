//! Version 1 of the colony/agent wire protocol.
//!
//! Hand-maintained prost messages. Field tags are frozen: removing or
//! renumbering a field is a protocol break and belongs in a `v2` module.

use std::collections::HashMap;

// === Enrollment & certificates ===

#[derive(Clone, PartialEq, prost::Message)]
pub struct EnrollRequest {
    /// Candidate bootstrap PSK, base32 display form.
    #[prost(string, tag = "1")]
    pub psk_candidate: String,
    /// PEM-encoded certificate signing request.
    #[prost(string, tag = "2")]
    pub csr_pem: String,
    /// Referral ticket (compact JWT) from the discovery service.
    #[prost(string, tag = "3")]
    pub ticket: String,
    /// Registration details applied atomically with admission.
    #[prost(message, optional, tag = "4")]
    pub registration: Option<AgentRegistration>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentRegistration {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(string, tag = "2")]
    pub component_name: String,
    #[prost(string, tag = "3")]
    pub mesh_ipv4: String,
    #[prost(string, tag = "4")]
    pub mesh_ipv6: String,
    /// Agent's WireGuard public key, base64.
    #[prost(string, tag = "5")]
    pub public_key: String,
    #[prost(message, repeated, tag = "6")]
    pub services: Vec<ServiceRecord>,
    #[prost(string, tag = "7")]
    pub runtime_context: String,
    #[prost(map = "string, string", tag = "8")]
    pub labels: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceRecord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub app_id: String,
    #[prost(string, tag = "4")]
    pub version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CertificateChain {
    /// PEM leaf certificate.
    #[prost(string, tag = "1")]
    pub leaf_pem: String,
    /// Remaining PEM blocks of the chain: intermediate, then root.
    #[prost(string, repeated, tag = "2")]
    pub chain_pem: Vec<String>,
    /// Leaf expiry, unix seconds.
    #[prost(uint64, tag = "3")]
    pub expires_at: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EnrollResponse {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(message, optional, tag = "2")]
    pub chain: Option<CertificateChain>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CertificateRequest {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(string, tag = "2")]
    pub csr_pem: String,
    #[prost(string, tag = "3")]
    pub ticket: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RevokeRequest {
    /// Hex serial of the certificate to revoke.
    #[prost(string, tag = "1")]
    pub serial: String,
    #[prost(string, tag = "2")]
    pub reason: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Ack {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CertificateListRequest {
    #[prost(string, tag = "1")]
    pub agent_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CertificateInfo {
    #[prost(string, tag = "1")]
    pub serial: String,
    #[prost(string, tag = "2")]
    pub agent_id: String,
    #[prost(string, tag = "3")]
    pub spiffe_id: String,
    #[prost(string, tag = "4")]
    pub status: String,
    #[prost(uint64, tag = "5")]
    pub not_after_secs: u64,
    #[prost(string, tag = "6")]
    pub revocation_reason: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CertificateList {
    #[prost(message, repeated, tag = "1")]
    pub certificates: Vec<CertificateInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentListRequest {
    /// Refresh service catalogs live before answering.
    #[prost(bool, tag = "1")]
    pub enrich: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentInfo {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(string, tag = "2")]
    pub component_name: String,
    #[prost(string, tag = "3")]
    pub mesh_ipv4: String,
    /// Derived health: active, degraded, unhealthy.
    #[prost(string, tag = "4")]
    pub health: String,
    #[prost(uint64, tag = "5")]
    pub last_seen_us: u64,
    #[prost(message, repeated, tag = "6")]
    pub services: Vec<ServiceRecord>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AgentList {
    #[prost(message, repeated, tag = "1")]
    pub agents: Vec<AgentInfo>,
}

// === Registry ===

#[derive(Clone, PartialEq, prost::Message)]
pub struct HeartbeatRequest {
    #[prost(string, tag = "1")]
    pub agent_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceListUpload {
    #[prost(string, tag = "1")]
    pub agent_id: String,
    #[prost(message, repeated, tag = "2")]
    pub services: Vec<ServiceRecord>,
}

// === Telemetry rows (agent pull responses) ===

#[derive(Clone, PartialEq, prost::Message)]
pub struct HistogramBucket {
    /// Inclusive upper bound of the bucket, nanoseconds.
    #[prost(double, tag = "1")]
    pub upper_bound_ns: f64,
    #[prost(uint64, tag = "2")]
    pub count: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HttpMetricRow {
    /// Observation time, unix microseconds.
    #[prost(uint64, tag = "1")]
    pub timestamp_us: u64,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(string, tag = "3")]
    pub method: String,
    #[prost(string, tag = "4")]
    pub path: String,
    #[prost(uint32, tag = "5")]
    pub status_code: u32,
    #[prost(uint64, tag = "6")]
    pub count: u64,
    #[prost(double, tag = "7")]
    pub duration_sum_ns: f64,
    #[prost(message, repeated, tag = "8")]
    pub histogram: Vec<HistogramBucket>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GrpcMetricRow {
    #[prost(uint64, tag = "1")]
    pub timestamp_us: u64,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(string, tag = "3")]
    pub rpc_method: String,
    #[prost(uint32, tag = "4")]
    pub status_code: u32,
    #[prost(uint64, tag = "5")]
    pub count: u64,
    #[prost(double, tag = "6")]
    pub duration_sum_ns: f64,
    #[prost(message, repeated, tag = "7")]
    pub histogram: Vec<HistogramBucket>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SqlMetricRow {
    #[prost(uint64, tag = "1")]
    pub timestamp_us: u64,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(string, tag = "3")]
    pub operation: String,
    #[prost(string, tag = "4")]
    pub table_name: String,
    #[prost(uint64, tag = "5")]
    pub count: u64,
    #[prost(double, tag = "6")]
    pub duration_sum_ns: f64,
    #[prost(message, repeated, tag = "7")]
    pub histogram: Vec<HistogramBucket>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TraceSpanRow {
    #[prost(uint64, tag = "1")]
    pub timestamp_us: u64,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(string, tag = "3")]
    pub trace_id: String,
    #[prost(string, tag = "4")]
    pub span_id: String,
    #[prost(string, tag = "5")]
    pub parent_span_id: String,
    #[prost(string, tag = "6")]
    pub name: String,
    /// Span kind: server, client, internal, producer, consumer.
    #[prost(string, tag = "7")]
    pub kind: String,
    #[prost(uint64, tag = "8")]
    pub duration_ns: u64,
    #[prost(string, tag = "9")]
    pub status: String,
    #[prost(string, tag = "10")]
    pub attributes_json: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SystemMetricRow {
    #[prost(uint64, tag = "1")]
    pub timestamp_us: u64,
    #[prost(string, tag = "2")]
    pub metric_name: String,
    #[prost(double, tag = "3")]
    pub value: f64,
    #[prost(string, tag = "4")]
    pub unit: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CpuProfileRow {
    #[prost(uint64, tag = "1")]
    pub timestamp_us: u64,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(string, tag = "3")]
    pub function_name: String,
    #[prost(string, tag = "4")]
    pub module_path: String,
    #[prost(uint64, tag = "5")]
    pub self_samples: u64,
    #[prost(uint64, tag = "6")]
    pub total_samples: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FunctionInfo {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(string, tag = "2")]
    pub function_name: String,
    #[prost(string, tag = "3")]
    pub module_path: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TelemetryPullResponse {
    #[prost(message, repeated, tag = "1")]
    pub http: Vec<HttpMetricRow>,
    #[prost(message, repeated, tag = "2")]
    pub grpc: Vec<GrpcMetricRow>,
    #[prost(message, repeated, tag = "3")]
    pub sql: Vec<SqlMetricRow>,
    #[prost(message, repeated, tag = "4")]
    pub spans: Vec<TraceSpanRow>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SystemMetricsPullResponse {
    #[prost(message, repeated, tag = "1")]
    pub rows: Vec<SystemMetricRow>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProfilePullResponse {
    #[prost(message, repeated, tag = "1")]
    pub rows: Vec<CpuProfileRow>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FunctionRegistryPullResponse {
    #[prost(message, repeated, tag = "1")]
    pub functions: Vec<FunctionInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceListPullResponse {
    #[prost(message, repeated, tag = "1")]
    pub services: Vec<ServiceRecord>,
}

// === Queries ===

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListServicesRequest {
    #[prost(uint64, tag = "1")]
    pub time_range_ms: u64,
    /// Optional: one of `registered`, `observed`, `verified`.
    #[prost(string, tag = "2")]
    pub source_filter: String,
    #[prost(string, tag = "3")]
    pub name_filter: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub source: String,
    #[prost(string, tag = "3")]
    pub status: String,
    #[prost(uint32, tag = "4")]
    pub instance_count: u32,
    /// Unix microseconds, 0 when unknown.
    #[prost(uint64, tag = "5")]
    pub last_seen_us: u64,
    #[prost(string, repeated, tag = "6")]
    pub agent_ids: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListServicesResponse {
    #[prost(message, repeated, tag = "1")]
    pub services: Vec<ServiceInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PercentileRequest {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(string, tag = "2")]
    pub metric: String,
    /// Fraction in [0, 1].
    #[prost(double, tag = "3")]
    pub percentile: f64,
    #[prost(uint64, tag = "4")]
    pub time_range_ms: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PercentileResponse {
    /// Interpolated quantile, nanoseconds.
    #[prost(double, tag = "1")]
    pub value_ns: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceActivityRequest {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(uint64, tag = "2")]
    pub time_range_ms: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceActivity {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(uint64, tag = "2")]
    pub request_count: u64,
    #[prost(uint64, tag = "3")]
    pub error_count: u64,
    #[prost(double, tag = "4")]
    pub avg_duration_ns: f64,
    #[prost(uint64, tag = "5")]
    pub last_seen_us: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServiceActivityList {
    #[prost(message, repeated, tag = "1")]
    pub services: Vec<ServiceActivity>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UnifiedQueryRequest {
    #[prost(uint64, tag = "1")]
    pub time_range_ms: u64,
    /// Optional service filter.
    #[prost(string, tag = "2")]
    pub service: String,
    /// Maximum items in detailed listings; 0 uses the per-query default.
    #[prost(uint32, tag = "3")]
    pub limit: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UnifiedQueryResponse {
    /// Human/AI-consumable rendering.
    #[prost(string, tag = "1")]
    pub text: String,
    /// Structured payload, JSON. Present where the query has one.
    #[prost(string, tag = "2")]
    pub structured_json: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RawSqlRequest {
    #[prost(string, tag = "1")]
    pub sql: String,
    /// 0 uses the configured default (1000).
    #[prost(uint32, tag = "2")]
    pub max_rows: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RawSqlRow {
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RawSqlResponse {
    #[prost(string, repeated, tag = "1")]
    pub columns: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub rows: Vec<RawSqlRow>,
    #[prost(bool, tag = "3")]
    pub truncated: bool,
}

// === Tools ===

#[derive(Clone, PartialEq, prost::Message)]
pub struct ToolRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Tool arguments, JSON object.
    #[prost(string, tag = "2")]
    pub args_json: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ToolResponse {
    #[prost(string, tag = "1")]
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn enroll_request_roundtrip() {
        let request = EnrollRequest {
            psk_candidate: "PSKPSKPSK".to_string(),
            csr_pem: "-----BEGIN CERTIFICATE REQUEST-----".to_string(),
            ticket: "eyJ.eyJ.sig".to_string(),
            registration: Some(AgentRegistration {
                agent_id: "agent-1".to_string(),
                component_name: "checkout".to_string(),
                mesh_ipv4: "10.82.0.2".to_string(),
                ..Default::default()
            }),
        };

        let decoded = EnrollRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        // A v2 sender may add fields; v1 decoding must not choke on them.
        let ack = Ack::decode(
            HeartbeatRequest {
                agent_id: "x".to_string(),
            }
            .encode_to_vec()
            .as_slice(),
        );
        assert!(ack.is_ok());
    }
}
