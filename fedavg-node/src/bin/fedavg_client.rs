use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

use fedavg_core::data::partition;
use fedavg_core::traits::TrainableUnit;
use fedavg_models::softmax::SoftmaxRegression;
use fedavg_models::synthetic::SyntheticCorpus;
use fedavg_net::http::HttpTransport;
use fedavg_node::config::NodeConfig;
use fedavg_node::coordinator::FinalReport;
use fedavg_node::node::ClientNode;
use fedavg_node::{logging, server, NodeError};

fn usage() -> ! {
    eprintln!("Usage: fedavg-client <client_index> [config.json]");
    eprintln!();
    eprintln!("Settings not in the config file come from FEDAVG_* environment variables.");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  FEDAVG_NUMBER_OF_CLIENTS=4 fedavg-client 0 fedavg.json");
    std::process::exit(2);
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        usage();
    }

    let client_index = match args.remove(0).parse::<usize>() {
        Ok(index) => index,
        Err(_) => usage(),
    };
    let config_path = if args.is_empty() {
        None
    } else {
        Some(PathBuf::from(args.remove(0)))
    };

    if !args.is_empty() {
        usage();
    }

    let config = match NodeConfig::load(client_index, config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = logging::init_tracing(config.verbose) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("could not start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(report) => {
            info!(
                client = report.client_index,
                rounds = report.rounds.len(),
                accuracy = report.evaluation.accuracy,
                "client finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: NodeConfig) -> Result<FinalReport, NodeError> {
    let identity = config.identity()?;
    let data = &config.data;

    let corpus = SyntheticCorpus::builder()
        .train_samples(data.train_samples)
        .test_samples(data.test_samples)
        .feature_dim(data.feature_dim)
        .classes(data.classes)
        .seed(data.seed)
        .build()?;
    let train = if data.permute {
        corpus.train.shuffled(data.seed)
    } else {
        corpus.train
    };
    let local = partition(&train, identity.total_clients(), identity.client_index())?;

    let (feature_dim, classes) = (data.feature_dim, data.classes);
    let (model_seed, learning_rate) = (config.model_seed, config.learning_rate);
    let factory = move || -> Box<dyn TrainableUnit> {
        Box::new(SoftmaxRegression::new(feature_dim, classes, model_seed).with_learning_rate(learning_rate))
    };

    let transport = HttpTransport::new(&config.aggregator_route(), identity.client_index())?;
    info!(
        client = identity.client_index(),
        aggregator = transport.url(),
        "uploads go to aggregator"
    );

    let node = ClientNode::builder()
        .identity(identity)
        .verbose(config.verbose > 0)
        .unit_factory(factory)
        .partition(local)
        .evaluation(corpus.test)
        .transport(Arc::new(transport))
        .spawn()?;

    let listener = TcpListener::bind(config.listen_addr()?).await?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = server::router(node.endpoint().clone(), config.max_payload_bytes);
    let mut serving = tokio::spawn(server::serve(listener, app, async move {
        tokio::select! {
            _ = stop_rx => {}
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
    }));

    let outcome = tokio::select! {
        outcome = node.wait() => outcome,
        served = &mut serving => {
            // The server only returns on its own when interrupted or broken.
            return match served {
                Ok(Ok(())) => Err(NodeError::WorkerStopped),
                Ok(Err(e)) => Err(NodeError::Io(e)),
                Err(_) => Err(NodeError::WorkerStopped),
            };
        }
    };
    let _ = stop_tx.send(());
    if let Ok(Err(e)) = serving.await {
        error!("endpoint shutdown failed: {e}");
    }
    outcome
}
