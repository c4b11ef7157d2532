//! LeNet-5 digit classifiers with a dense and a fully-convolutional head over one shared
//! feature extractor, plus the tooling around them: weight porting between the two heads,
//! a training loop writing plain-text metric logs, terminal plots and image preprocessing.

pub mod cli;
pub mod data;
pub mod error;
pub mod logger;
pub mod metric_log;
pub mod model;
pub mod plot;
pub mod port;
pub mod preprocess;
pub mod state_dict;
pub mod training;

pub use error::{Error, Result};
pub use model::{DigitClassifier, LeNet5, LeNet5Config, LeNet5Fcn, LeNet5FcnConfig, Variant};
pub use port::{port_into, port_state_dict, PortMapping, PortReport, PortStrategy};
pub use state_dict::{StateDict, StateDictModule};
pub use training::{RunSummary, TrainingConfig};
