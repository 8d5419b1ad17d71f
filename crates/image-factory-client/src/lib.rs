//! Talos Image Factory Client
//!
//! Registers schematics (boot image customizations) with a Talos Image
//! Factory and returns their content-addressed IDs.
//!
//! # Example
//!
//! ```no_run
//! use image_factory_client::{ImageFactoryClient, SchematicGenerator, SchematicRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ImageFactoryClient::new("https://factory.talos.dev".to_string(), false)?;
//! let request = SchematicRequest::with_kernel_args(vec!["console=ttyS0,38400n8".to_string()]);
//! let id = client.generate_schematic(&request).await?;
//! println!("schematic {id}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod generator;
pub mod models;

pub use client::{ImageFactoryClient, DEFAULT_IMAGE_FACTORY_URL};
pub use error::ImageFactoryError;
pub use generator::SchematicGenerator;
pub use models::*;
