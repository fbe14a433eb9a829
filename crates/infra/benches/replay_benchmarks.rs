use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, TimeZone, Utc};
use jobward_core::{ExpectedVersion, JobId, JobSpec, LeaseId, WorkerId};
use jobward_events::{EnvironmentFingerprint, JobEvent, LeaseRecord, Submitted, project};
use jobward_infra::event_store::{EventStore, FileEventStore, InMemoryEventStore};

fn submitted(job_id: &JobId) -> JobEvent {
    JobEvent::Submitted(Submitted {
        job_id: job_id.clone(),
        spec: JobSpec::example().prepared().unwrap(),
        fingerprint: EnvironmentFingerprint::default(),
        producer_version: "bench".to_string(),
    })
}

/// A job log padded with `len` lease acquisitions, which are valid in any state.
fn fill<S: EventStore>(store: &S, job_id: &JobId, len: u64) {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    store.create_job(job_id, &submitted(job_id), start).unwrap();
    let worker = WorkerId::new("bench").unwrap();
    for i in 0..len {
        let at = start + Duration::seconds(i as i64);
        let lease = LeaseRecord {
            worker_id: worker.clone(),
            lease_id: LeaseId::new(),
            acquired_at: at,
            expires_at: at + Duration::seconds(30),
            released_at: None,
        };
        store
            .append(
                job_id,
                &JobEvent::LeaseAcquired(lease),
                at,
                ExpectedVersion::Exact(i + 1),
            )
            .unwrap();
    }
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    let job_id = JobId::parse("bench_job").unwrap();

    for len in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(len + 1));

        let memory = InMemoryEventStore::new();
        fill(&memory, &job_id, len);
        group.bench_with_input(BenchmarkId::new("in_memory", len), &len, |b, _| {
            b.iter(|| project(&job_id, memory.read_events(black_box(&job_id)).unwrap()).unwrap());
        });

        let dir = tempfile::tempdir().unwrap();
        let file = FileEventStore::new(dir.path());
        fill(&file, &job_id, len);
        group.bench_with_input(BenchmarkId::new("file", len), &len, |b, _| {
            b.iter(|| project(&job_id, file.read_events(black_box(&job_id)).unwrap()).unwrap());
        });
    }
    group.finish();
}

fn bench_file_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_append");
    group.sample_size(20);
    group.bench_function("append_to_100_event_log", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                let store = FileEventStore::new(dir.path());
                let job_id = JobId::parse("bench_job").unwrap();
                fill(&store, &job_id, 100);
                (dir, store, job_id)
            },
            |(_dir, store, job_id)| {
                let at = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
                let lease = LeaseRecord {
                    worker_id: WorkerId::new("bench").unwrap(),
                    lease_id: LeaseId::new(),
                    acquired_at: at,
                    expires_at: at + Duration::seconds(30),
                    released_at: None,
                };
                store
                    .append(
                        &job_id,
                        &JobEvent::LeaseAcquired(lease),
                        at,
                        ExpectedVersion::Exact(101),
                    )
                    .unwrap();
            },
        );
    });
    group.finish();
}

criterion_group!(benches, bench_replay, bench_file_append);
criterion_main!(benches);
