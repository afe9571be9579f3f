pub mod config;
pub mod finnhub;
pub mod fmp;
pub mod gateway;
pub mod polygon;
pub mod rate_limit;
pub mod registry;
pub mod transport;
pub mod yahoo;

pub use config::GatewayConfig;
pub use finnhub::FinnhubClient;
pub use fmp::FmpClient;
pub use gateway::{ResilientGateway, Sleeper, TokioSleeper};
pub use polygon::PolygonClient;
pub use rate_limit::RateLimiter;
pub use registry::{ProviderRegistry, ProviderState, ProviderStatus};
pub use transport::{HttpTransport, ProviderRequest, ProviderResponse, Transport};
pub use yahoo::YahooClient;
