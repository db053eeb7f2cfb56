use crate::cli::config::{AppConfig, SourceKind, Task};
use crate::cli::telemetry;
use anyhow::{Context, bail};
use sctid::{
    CacheManagerConfig, ComponentType, IdentifierCacheManager, IdentifierReservedBlock,
    IdentifierService, IdentifierSource, LocalRandomIdentifierSource, LocalSequentialIdentifierSource, Namespace,
    Partition, RegistrationConfig, Sctid,
};
use sctid_cis::{CisClient, CisConfig};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Runs the configured task, writing its results to `out`.
///
/// Long running work is abandoned when `token` is cancelled.
pub async fn run<W: Write>(
    config: AppConfig,
    token: CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let AppConfig {
        task,
        cache,
        registration,
        authority,
    } = config;

    match task {
        Task::Validate {
            component_type,
            ids,
        } => validate(&ids, component_type, out),
        Task::BulkReserve {
            namespace,
            partition,
            quantity,
            output,
        } => {
            let client = connect(authority).await?;
            let ids = until_cancelled(
                &token,
                bulk_reserve(&client, namespace, partition, quantity),
            )
            .await?;
            match output {
                Some(path) => write_ids_to(&path, &ids),
                None => write_ids(out, &ids),
            }
        }
        Task::ReserveBlock {
            namespace,
            concepts,
            descriptions,
            relationships,
            source,
            register,
        } => {
            let source: Arc<dyn IdentifierSource> = match source {
                SourceKind::Sequential => Arc::new(LocalSequentialIdentifierSource::new()),
                SourceKind::Random => Arc::new(LocalRandomIdentifierSource::new()),
                SourceKind::Remote => Arc::new(connect(authority).await?),
            };
            let request = BlockRequest {
                namespace,
                counts: [concepts, descriptions, relationships],
                register,
            };
            reserve_block(source, cache, registration, request, token, out).await
        }
        Task::Register { namespace, ids } => {
            let ids = parse_ids(&ids, namespace)?;
            let client = connect(authority).await?;
            until_cancelled(&token, async {
                client
                    .register_identifiers(namespace, &ids)
                    .await
                    .context("registration failed")
            })
            .await?;
            tracing::info!("Registered {} identifiers in namespace {namespace}", ids.len());
            Ok(())
        }
    }
}

async fn connect(authority: Option<CisConfig>) -> anyhow::Result<CisClient> {
    let config = authority.context("no identifier authority configured")?;
    let url = config.base_url.clone();
    CisClient::connect(config)
        .await
        .with_context(|| format!("failed to connect to identifier authority at {url}"))
}

async fn until_cancelled<T>(
    token: &CancellationToken,
    work: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::select! {
        result = work => result,
        () = token.cancelled() => bail!("interrupted"),
    }
}

async fn bulk_reserve(
    client: &CisClient,
    namespace: Namespace,
    partition: Partition,
    quantity: usize,
) -> anyhow::Result<Vec<Sctid>> {
    tracing::info!(
        "Reserving {quantity} identifiers in namespace {namespace}, partition {partition}"
    );
    let start = Instant::now();
    let result = client.reserve(namespace, partition, quantity).await;
    telemetry::record_reservation_duration(start.elapsed().as_secs_f64() * 1000.0);

    match result {
        Ok(ids) => {
            telemetry::increment_ids_reserved(ids.len() as u64);
            Ok(ids)
        }
        Err(err) => {
            telemetry::increment_reservation_errors();
            Err(err).context("bulk reservation failed")
        }
    }
}

struct BlockRequest {
    namespace: Namespace,
    /// Concepts, descriptions and relationships, in that order.
    counts: [usize; 3],
    register: bool,
}

async fn reserve_block<W: Write>(
    source: Arc<dyn IdentifierSource>,
    cache: CacheManagerConfig,
    registration: RegistrationConfig,
    request: BlockRequest,
    token: CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let manager = Arc::new(IdentifierCacheManager::new(source, cache)?);
    let refill_token = token.child_token();
    let refill = manager.clone().spawn_refill(refill_token.clone());
    let service = IdentifierService::new(manager, registration)?;

    let [concepts, descriptions, relationships] = request.counts;
    let start = Instant::now();
    let result = until_cancelled(&token, async {
        service
            .get_reserved_block(request.namespace, concepts, descriptions, relationships)
            .await
            .map_err(anyhow::Error::from)
    })
    .await;
    telemetry::record_reservation_duration(start.elapsed().as_secs_f64() * 1000.0);

    let outcome = match result {
        Ok(block) => {
            telemetry::increment_blocks_reserved();
            print_block(&block, out).map(|taken| {
                telemetry::increment_ids_reserved(taken as u64);
                block
            })
        }
        Err(err) => {
            telemetry::increment_reservation_errors();
            Err(err)
        }
    };

    let outcome = match outcome {
        Ok(block) if request.register => until_cancelled(&token, async {
            service
                .register_assigned_ids(&block)
                .await
                .context("registration failed")
        })
        .await,
        Ok(_) => Ok(()),
        Err(err) => Err(err),
    };

    refill_token.cancel();
    if let Err(err) = refill.await {
        tracing::error!("Refill loop ended abnormally: {err}");
    }
    outcome
}

/// Takes every identifier out of `block` and writes it as
/// `<component type>\t<sctid>`. Returns how many were written.
fn print_block<W: Write>(block: &IdentifierReservedBlock, out: &mut W) -> anyhow::Result<usize> {
    let mut taken = 0;
    for component_type in ComponentType::ALL {
        for _ in 0..block.size(component_type) {
            let id = block.get_id(component_type)?;
            writeln!(out, "{component_type}\t{id}")?;
            taken += 1;
        }
    }
    out.flush()?;
    Ok(taken)
}

fn parse_ids(raw: &[String], namespace: Namespace) -> anyhow::Result<Vec<Sctid>> {
    raw.iter()
        .map(|raw| {
            let id: Sctid = raw.parse().with_context(|| format!("cannot register {raw:?}"))?;
            if id.namespace() != namespace {
                bail!(
                    "{id} belongs to namespace {}, not {namespace}",
                    id.namespace()
                );
            }
            Ok(id)
        })
        .collect()
}

fn validate<W: Write>(
    ids: &[String],
    expected: Option<ComponentType>,
    out: &mut W,
) -> anyhow::Result<()> {
    let mut invalid = 0;
    for raw in ids {
        let checked =
            IdentifierService::validate_id(raw, expected).and_then(|()| raw.parse::<Sctid>());
        match checked {
            Ok(id) => writeln!(out, "{raw}\tvalid\t{}", id.component_type())?,
            Err(err) => {
                invalid += 1;
                writeln!(out, "{raw}\tinvalid\t{err}")?;
            }
        }
    }
    out.flush()?;

    if invalid > 0 {
        bail!("{invalid} of {} identifiers are invalid", ids.len());
    }
    Ok(())
}

fn write_ids<W: Write>(out: &mut W, ids: &[Sctid]) -> anyhow::Result<()> {
    for id in ids {
        writeln!(out, "{id}")?;
    }
    out.flush()?;
    Ok(())
}

fn write_ids_to(path: &Path, ids: &[Sctid]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    write_ids(&mut BufWriter::new(file), ids)?;
    tracing::info!("Wrote {} identifiers to {}", ids.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(task: Task) -> AppConfig {
        AppConfig {
            task,
            cache: CacheManagerConfig {
                prefetch_count: 10,
                ..Default::default()
            },
            registration: RegistrationConfig::default(),
            authority: None,
        }
    }

    async fn run_to_string(task: Task) -> (anyhow::Result<()>, String) {
        let mut out = Vec::new();
        let result = run(config(task), CancellationToken::new(), &mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn validate_reports_each_identifier() {
        let (result, out) = run_to_string(Task::Validate {
            component_type: None,
            ids: vec!["1119303003".into(), "11000055126".into()],
        })
        .await;
        result.unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec!["1119303003\tvalid\tConcept", "11000055126\tvalid\tRelationship"]
        );
    }

    #[tokio::test]
    async fn validate_fails_on_bad_check_digit() {
        let (result, out) = run_to_string(Task::Validate {
            component_type: None,
            ids: vec!["1119303003".into(), "1119303004".into()],
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("1 of 2"), "{err}");
        assert!(out.contains("1119303004\tinvalid"));
    }

    #[tokio::test]
    async fn validate_enforces_component_type() {
        let (result, _) = run_to_string(Task::Validate {
            component_type: Some(ComponentType::Description),
            ids: vec!["1119303003".into()],
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reserve_block_prints_requested_counts() {
        let (result, out) = run_to_string(Task::ReserveBlock {
            namespace: Namespace::new(1_000_052),
            concepts: 1,
            descriptions: 2,
            relationships: 3,
            source: SourceKind::Sequential,
            register: false,
        })
        .await;
        result.unwrap();

        let mut counts = [0; 3];
        for line in out.lines() {
            let (component_type, id) = line.split_once('\t').unwrap();
            let id: Sctid = id.parse().unwrap();
            assert_eq!(id.namespace(), Namespace::new(1_000_052));
            assert_eq!(id.component_type().to_string(), component_type);
            counts[id.component_type().partition_digit() as usize] += 1;
        }
        assert_eq!(counts, [1, 2, 3]);
    }

    #[tokio::test]
    async fn reserve_block_from_random_source_is_unique() {
        let (result, out) = run_to_string(Task::ReserveBlock {
            namespace: Namespace::INTERNATIONAL,
            concepts: 5,
            descriptions: 5,
            relationships: 5,
            source: SourceKind::Random,
            register: false,
        })
        .await;
        result.unwrap();

        let ids: std::collections::HashSet<&str> =
            out.lines().map(|line| line.split_once('\t').unwrap().1).collect();
        assert_eq!(ids.len(), 15);
    }

    #[tokio::test]
    async fn cancelled_token_interrupts_pending_work() {
        let token = CancellationToken::new();
        token.cancel();
        let err = until_cancelled(&token, std::future::pending::<anyhow::Result<()>>())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "interrupted");
    }

    #[test]
    fn register_rejects_foreign_namespace() {
        let err = parse_ids(&["1119303003".into()], Namespace::new(1_000_052)).unwrap_err();
        assert!(err.to_string().contains("belongs to namespace 0"), "{err}");
        assert!(parse_ids(&["11000052100".into()], Namespace::new(1_000_052)).is_ok());
    }
}
