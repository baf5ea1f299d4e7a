pub mod mercado_pago;
pub mod stub;

pub use mercado_pago::{MercadoPagoConfig, MercadoPagoProvider};
pub use stub::StubChargeProvider;
