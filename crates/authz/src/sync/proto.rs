//! Protobuf message shapes for inbound tenant lifecycle events.
//!
//! Hand-written prost structs; the wire contract is owned by the tenant
//! service, these mirror it field-for-field.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct EventEnvelopeMeta {
    #[prost(string, tag = "1")]
    pub correlation_id: String,
    /// User who triggered the event; empty when system-initiated.
    #[prost(string, tag = "2")]
    pub user_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TenantRef {
    #[prost(string, tag = "1")]
    pub tenant_id: String,
    #[prost(string, tag = "2")]
    pub tenant_code: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct TenantCreated {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<EventEnvelopeMeta>,
    #[prost(message, optional, tag = "2")]
    pub tenant: Option<TenantRef>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TenantDeactivated {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<EventEnvelopeMeta>,
    #[prost(string, tag = "2")]
    pub tenant_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_created_roundtrip() {
        let event = TenantCreated {
            metadata: Some(EventEnvelopeMeta {
                correlation_id: "b8e5c3e2-33b4-4b0a-9f2a-0f2e5cbb9a01".to_string(),
                user_id: "8b7a3b1e-12cd-4a5b-9f0e-aa28c6f9d302".to_string(),
            }),
            tenant: Some(TenantRef {
                tenant_id: "f0a6f9e8-2c4d-4f6a-8b1c-3d5e7f9a0b2c".to_string(),
                tenant_code: "acme".to_string(),
            }),
        };

        let bytes = event.encode_to_vec();
        let decoded = TenantCreated::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(TenantCreated::decode(&b"\xff\xff\xff\xff"[..]).is_err());
    }
}
