use burn::{backend::Autodiff, tensor::backend::Backend};
use clap::Parser;
use lenet::{
    cli::{Cli, Commands},
    error::Result,
    plot::plot_accuracy,
    preprocess::invert_digits,
    training,
};

#[cfg(any(
    feature = "ndarray",
    feature = "ndarray-blas-netlib",
    feature = "ndarray-blas-openblas",
    feature = "ndarray-blas-accelerate",
))]
mod ndarray {
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    pub fn run(cli: super::Cli) -> super::Result<()> {
        super::launch::<NdArray>(cli, NdArrayDevice::Cpu)
    }
}

#[cfg(feature = "tch-gpu")]
mod tch_gpu {
    use burn::backend::libtorch::{LibTorch, LibTorchDevice};

    pub fn run(cli: super::Cli) -> super::Result<()> {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        super::launch::<LibTorch>(cli, device)
    }
}

#[cfg(feature = "tch-cpu")]
mod tch_cpu {
    use burn::backend::libtorch::{LibTorch, LibTorchDevice};

    pub fn run(cli: super::Cli) -> super::Result<()> {
        super::launch::<LibTorch>(cli, LibTorchDevice::Cpu)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use burn::backend::wgpu::{Wgpu, WgpuDevice};

    pub fn run(cli: super::Cli) -> super::Result<()> {
        super::launch::<Wgpu>(cli, WgpuDevice::default())
    }
}

fn launch<B: Backend>(cli: Cli, device: B::Device) -> Result<()> {
    match cli.command {
        Commands::Train(args) => {
            let (config, root) = args.training_config();
            let summary = training::run::<Autodiff<B>>(&config, &root, device)?;
            println!("Checkpoint saved to {}", summary.checkpoint.display());
            Ok(())
        }
        Commands::Plot { dir, no_loss } => plot_accuracy(dir, !no_loss),
        Commands::Invert { src, dst } => {
            let count = invert_digits(&src, &dst)?;
            println!("Inverted {count} images into {}", dst.display());
            Ok(())
        }
    }
}

#[allow(unreachable_code)]
fn dispatch(cli: Cli) -> Result<()> {
    #[cfg(feature = "wgpu")]
    return wgpu::run(cli);
    #[cfg(feature = "tch-gpu")]
    return tch_gpu::run(cli);
    #[cfg(feature = "tch-cpu")]
    return tch_cpu::run(cli);
    #[cfg(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
        feature = "ndarray-blas-accelerate",
    ))]
    return ndarray::run(cli);

    unreachable!("At least one backend will be selected.")
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = dispatch(cli) {
        log::error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
