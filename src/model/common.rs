/// Identifier of an endpoint, parameter or input, unique within its document
pub type Id = String;
