use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    model::{Variant, INPUT_SIZE},
    training::{PortStrategyKind, TrainingConfig},
};

#[derive(Parser, Debug)]
#[command(name = "lenet", version, about = "Train and inspect LeNet-5 digit classifiers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a network and write its checkpoint and metric logs
    Train(TrainArgs),
    /// Plot the metric logs of a run in the terminal
    Plot {
        /// Run directory holding `accuracy.txt` and `loss.txt`
        dir: PathBuf,
        /// Only plot the accuracy
        #[arg(long)]
        no_loss: bool,
    },
    /// Invert every digit image of a `{d}/img{d}_{j}.jpg` folder
    Invert {
        /// Source folder
        src: PathBuf,
        /// Destination folder, created when missing
        dst: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Run name; artifacts go to `{checkpoint_dir}/{num_epochs}_{name}/`
    #[arg(long, default_value = "epochs_LeNet5_FC_32x32")]
    name: String,
    /// Root directory of all runs
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,
    /// Classification head
    #[arg(long, value_enum, default_value_t = Variant::Fcn)]
    variant: Variant,
    /// Number of epochs of training
    #[arg(long, default_value_t = 10)]
    num_epochs: usize,
    /// Size of the batches
    #[arg(long, default_value_t = 16)]
    batch_size: usize,
    /// Number of data loader workers
    #[arg(long, default_value_t = 8)]
    num_workers: usize,
    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Learning rate
    #[arg(long, default_value_t = 2e-3)]
    lr: f64,
    /// SGD momentum
    #[arg(long, default_value_t = 0.9)]
    momentum: f64,
    /// Side length of the network input
    #[arg(long, default_value_t = INPUT_SIZE)]
    image_size: usize,
    /// Digit folder with `train/` and `test/` sub-folders, MNIST when omitted
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Dense checkpoint (without extension) to port weights from
    #[arg(long)]
    port_from: Option<PathBuf>,
    /// How ported weights are matched to the new network
    #[arg(long, value_enum, default_value_t = PortStrategyKind::Positional)]
    port_strategy: PortStrategyKind,
}

impl TrainArgs {
    /// Training configuration and checkpoint root.
    pub fn training_config(&self) -> (TrainingConfig, PathBuf) {
        let config = TrainingConfig::new(TrainingConfig::sgd(self.momentum), self.name.clone())
            .with_variant(self.variant)
            .with_num_epochs(self.num_epochs)
            .with_batch_size(self.batch_size)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
            .with_learning_rate(self.lr)
            .with_image_size(self.image_size)
            .with_data_dir(self.data_dir.as_ref().map(|dir| dir.display().to_string()))
            .with_port_from(self.port_from.as_ref().map(|path| path.display().to_string()))
            .with_port_strategy(self.port_strategy);

        (config, self.checkpoint_dir.clone())
    }
}
