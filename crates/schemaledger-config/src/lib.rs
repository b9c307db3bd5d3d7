pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, load_dotenv};
pub use model::{AppConfig, ConnectionTarget, DatabaseConfig, MigrationsConfig, PoolConfig};
