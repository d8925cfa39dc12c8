/// Per-node response metadata attached by the API proxy.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metadata {
    #[prost(string, tag = "1")]
    pub hostname: ::prost::alloc::string::String,
    /// Set when the proxied call failed on this node.
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

impl Metadata {
    pub fn failed(&self) -> bool {
        !self.error.is_empty()
    }
}

/// `google.protobuf.Empty`
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}
