use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use task_runner_module::{HttpAgentRunner, PlatformRunner};

use pipeline_module::adapters::{GraphMailAdapter, SlackAdapter};
use pipeline_module::channel::ChannelAdapter;
use pipeline_module::config::ServiceConfig;
use pipeline_module::domain::TaskPlatform;
use pipeline_module::jobs::{spawn_job, PipelineJob};
use pipeline_module::llm::{ChatClient, ClientPool};
use pipeline_module::lock::MongoWorkLock;
use pipeline_module::pipeline::{
    AllowlistAuthorizer, ClassifyJob, DispatchJob, GreetingHandler, InboundPollJob,
    LlmGreetingResponder, LlmIntentClassifier, LlmReplySummarizer, LlmResultVerifier,
    LlmTaskExtractor, SynthesizeJob, TaskExecutionJob, TaskFanout,
};
use pipeline_module::store::{connect_database, MongoStore, RecordStore};
use pipeline_module::Channel;

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let config = ServiceConfig::from_env();
    if let Err(err) = run(config) {
        error!("service failed: {}", err);
        std::process::exit(1);
    }
}

fn run(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let database = connect_database(&config.mongodb_url, &config.database_name)?;
    let store: Arc<dyn RecordStore> = Arc::new(MongoStore::new(&database));
    let lock = Arc::new(MongoWorkLock::new(&database));

    let chat = |model: &str, temperature: f32| {
        ChatClient::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            model.to_string(),
        )
        .with_temperature(temperature)
    };

    let classifier = Arc::new(LlmIntentClassifier::new(chat(&config.classifier_model, 0.5)));
    let extractor = Arc::new(LlmTaskExtractor::new(chat(&config.extractor_model, 0.7)));
    let verifier = Arc::new(LlmResultVerifier::new(chat(&config.verifier_model, 0.5)));
    let summarizer = Arc::new(LlmReplySummarizer::new(chat(&config.summarizer_model, 0.4)));
    let greeting_pool = Arc::new(ClientPool::new(chat(&config.greeting_model, 0.7)));

    let fanout = Arc::new(TaskFanout::new(store.clone(), extractor));
    let greeter = Arc::new(GreetingHandler::new(
        store.clone(),
        Arc::new(LlmGreetingResponder::new(greeting_pool)),
        config.greeting_history_limit,
    ));
    let authorizer = Arc::new(AllowlistAuthorizer::new(config.allowed_senders.clone()));

    let mut runners: HashMap<TaskPlatform, Arc<dyn PlatformRunner>> = HashMap::new();
    if config.git_agent_url.is_empty() {
        warn!("GIT_AGENT_URL not set, git tasks will stay pending");
    } else {
        runners.insert(
            TaskPlatform::Git,
            Arc::new(HttpAgentRunner::new(config.git_agent_url.clone())),
        );
    }
    if config.jira_agent_url.is_empty() {
        warn!("JIRA_AGENT_URL not set, jira tasks will stay pending");
    } else {
        runners.insert(
            TaskPlatform::Jira,
            Arc::new(HttpAgentRunner::new(config.jira_agent_url.clone())),
        );
    }

    let mut adapters: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
    if config.graph_client_id.is_empty() {
        warn!("graph credentials not set, email channel disabled");
    } else {
        adapters.insert(
            Channel::Email,
            Arc::new(GraphMailAdapter::new(
                config.graph_tenant_id.clone(),
                config.graph_client_id.clone(),
                config.graph_client_secret.clone(),
                config.graph_user_email.clone(),
            )),
        );
    }
    if config.slack_bot_token.is_empty() {
        warn!("SLACK_BOT_TOKEN not set, slack channel disabled");
    } else {
        adapters.insert(
            Channel::Slack,
            Arc::new(SlackAdapter::new(
                config.slack_bot_token.clone(),
                config.slack_channels.clone(),
            )),
        );
    }

    let mut jobs: Vec<Arc<dyn PipelineJob>> = Vec::new();
    for adapter in adapters.values() {
        jobs.push(Arc::new(InboundPollJob::new(
            store.clone(),
            adapter.clone(),
            authorizer.clone(),
        )));
    }
    jobs.push(Arc::new(ClassifyJob::new(
        store.clone(),
        classifier,
        fanout,
        greeter,
    )));
    jobs.push(Arc::new(TaskExecutionJob::new(
        store.clone(),
        lock,
        runners,
        verifier,
        config.lock_ttl,
        config.stale_verdict_limit,
    )));
    jobs.push(Arc::new(SynthesizeJob::new(
        store.clone(),
        summarizer,
        config.synth_max_wait,
        config.synth_check_interval,
    )));
    jobs.push(Arc::new(DispatchJob::new(store.clone(), adapters)));

    let stop = Arc::new(AtomicBool::new(false));
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| spawn_job(job, config.poll_interval, stop.clone()))
        .collect();
    info!("pipeline service running with {} jobs", handles.len());

    // The jobs are plain threads; the runtime exists only to wait for the
    // shutdown signal.
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(tokio::signal::ctrl_c())?;
    info!("shutdown requested");
    stop.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}
