use super::artifacts::{DIGEST_FILE, SIGNATURE_FILE, TOC_FILE};
use super::*;
use crate::xar::test_support::ArchiveBuilder;
use std::ffi::OsString;
use std::io;
use std::sync::Mutex;
use tempfile::TempDir;

/// What a recorded invocation was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Create,
    SignProbe,
    ReplaceSign,
    ExtractToc,
    SignToc,
    Inject,
}

/// Scripted stand-in for xar, openssl and xartool.
struct FakeRunner {
    calls: Mutex<Vec<(Call, Invocation)>>,
    fail: Option<(Call, i32)>,
    probe_len: usize,
    toc_sig_len: usize,
    injected: Mutex<Option<Vec<u8>>>,
}

impl FakeRunner {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: None,
            probe_len: 128,
            toc_sig_len: 128,
            injected: Mutex::new(None),
        }
    }

    fn failing(call: Call, code: i32) -> Self {
        Self {
            fail: Some((call, code)),
            ..Self::new()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    fn invocation(&self, call: Call) -> Invocation {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| *c == call)
            .map(|(_, inv)| inv.clone())
            .unwrap()
    }

    fn classify(inv: &Invocation) -> Call {
        let args: Vec<String> = inv
            .get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        match args.first().map(String::as_str) {
            Some("-cf") => Call::Create,
            Some("--replace-sign") => Call::ReplaceSign,
            Some("--inject-sig") => Call::Inject,
            Some("dgst") => {
                if args.last().is_some_and(|a| a.ends_with(TOC_FILE)) {
                    Call::SignToc
                } else {
                    Call::SignProbe
                }
            }
            _ => Call::ExtractToc,
        }
    }

    fn arg_after(inv: &Invocation, flag: &str) -> PathBuf {
        let args = inv.get_args();
        let pos = args.iter().position(|a| a == flag).unwrap();
        PathBuf::from(&args[pos + 1])
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, inv: &Invocation) -> io::Result<ToolOutput> {
        let call = Self::classify(inv);
        self.calls.lock().unwrap().push((call.clone(), inv.clone()));

        if let Some((ref failing, code)) = self.fail {
            if *failing == call {
                return Ok(ToolOutput::failure(code));
            }
        }

        match call {
            Call::Create => {
                let archive = Self::arg_after(inv, "-cf");
                let bytes = ArchiveBuilder::new("test.safariextension")
                    .file("Info.plist", b"<plist/>")
                    .file("global.html", b"<html/>")
                    .build();
                fs::write(archive, bytes)?;
                Ok(ToolOutput::success_with(Vec::new()))
            }
            Call::ReplaceSign => {
                fs::write(Self::arg_after(inv, "--data-to-sign"), [0u8; 20])?;
                Ok(ToolOutput::success_with(Vec::new()))
            }
            Call::ExtractToc => {
                let dir = inv.get_current_dir().unwrap();
                fs::write(dir.join(TOC_FILE), b"compressed toc")?;
                Ok(ToolOutput::success_with(Vec::new()))
            }
            Call::SignProbe => Ok(ToolOutput::success_with(vec![0x11; self.probe_len])),
            Call::SignToc => Ok(ToolOutput::success_with(vec![0x22; self.toc_sig_len])),
            Call::Inject => {
                let sig = fs::read(Self::arg_after(inv, "--inject-sig"))?;
                *self.injected.lock().unwrap() = Some(sig);
                Ok(ToolOutput::success_with(Vec::new()))
            }
        }
    }
}

/// A runner whose programs cannot be started.
struct NoSuchProgram;

impl ToolRunner for NoSuchProgram {
    fn run(&self, _invocation: &Invocation) -> io::Result<ToolOutput> {
        Err(io::Error::new(io::ErrorKind::NotFound, "not found"))
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

struct Job {
    dir: TempDir,
    options: PackOptions,
}

impl Job {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("temp");
        let options = PackOptions::new()
            .private_key(fixture("key-rsa1024.pem"))
            .extension_cer(fixture("dev.cer"))
            .apple_dev_cer(fixture("apple1.cer"))
            .apple_root_cer(fixture("apple2.cer"))
            .temp(&temp);
        Self { dir, options }
    }

    fn archive(&self) -> PathBuf {
        self.dir.path().join("test.safariextz")
    }

    fn source(&self) -> PathBuf {
        self.dir.path().join("src/test.safariextension")
    }

    fn temp(&self) -> PathBuf {
        self.dir.path().join("temp")
    }

    fn assert_clean(&self) {
        for name in [DIGEST_FILE, SIGNATURE_FILE, TOC_FILE] {
            assert!(!self.temp().join(name).exists(), "{name} left behind");
        }
    }
}

fn external_toc() -> Toolchain {
    Toolchain::new().toc_tool("xartool")
}

const ALL_CALLS: [Call; 6] = [
    Call::Create,
    Call::SignProbe,
    Call::ReplaceSign,
    Call::ExtractToc,
    Call::SignToc,
    Call::Inject,
];

#[test]
fn test_stage_order() {
    let job = Job::new();
    let runner = FakeRunner::new();
    let packer = Packer::with_runner(&runner).toolchain(external_toc());

    let report = packer.run(job.archive(), job.source(), &job.options).unwrap();

    assert_eq!(runner.calls(), ALL_CALLS);
    assert_eq!(report.state, PackState::Signed { sig_size: 128 });
    assert_eq!(report.signature_size, 128);
    assert_eq!(report.archive, job.archive());
}

#[test]
fn test_success_cleans_temp() {
    let job = Job::new();
    let runner = FakeRunner::new();
    Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap();

    job.assert_clean();
    assert!(job.archive().exists());
}

#[test]
fn test_injected_signature_is_toc_signature() {
    let job = Job::new();
    let runner = FakeRunner::new();
    Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap();

    let injected = runner.injected.lock().unwrap().clone().unwrap();
    assert_eq!(injected, vec![0x22; 128]);
}

#[test]
fn test_create_runs_in_source_parent() {
    let job = Job::new();
    let runner = FakeRunner::new();
    Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap();

    let create = runner.invocation(Call::Create);
    let parent = job.dir.path().join("src");
    assert_eq!(create.get_current_dir(), Some(parent.as_path()));
    assert_eq!(
        create.get_args().last(),
        Some(&OsString::from("test.safariextension"))
    );
}

#[test]
fn test_probe_size_is_reserved() {
    let job = Job::new();
    let runner = FakeRunner {
        probe_len: 256,
        toc_sig_len: 256,
        ..FakeRunner::new()
    };
    Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap();

    let replace = runner.invocation(Call::ReplaceSign);
    assert_eq!(FakeRunner::arg_after(&replace, "--sig-size"), PathBuf::from("256"));
    assert_eq!(
        FakeRunner::arg_after(&replace, "--data-to-sign"),
        job.temp().join(DIGEST_FILE)
    );

    let probe = runner.invocation(Call::SignProbe);
    let key = fixture("key-rsa1024.pem");
    assert_eq!(probe.get_args().last(), Some(&key.into_os_string()));
}

#[test]
fn test_create_failure_never_signs() {
    let job = Job::new();
    let runner = FakeRunner::failing(Call::Create, 1);
    let err = Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(1));
    assert!(matches!(err, Error::ToolFailed { stage: Stage::Create, .. }));
    assert_eq!(runner.calls(), [Call::Create]);
}

#[test]
fn test_probe_failure_never_replace_signs() {
    let job = Job::new();
    let runner = FakeRunner::failing(Call::SignProbe, 3);
    let err = Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(3));
    assert_eq!(runner.calls(), [Call::Create, Call::SignProbe]);
}

#[test]
fn test_failure_at_each_stage_stops_pipeline() {
    for (index, call) in ALL_CALLS.iter().enumerate() {
        let job = Job::new();
        let runner = FakeRunner::failing(call.clone(), 40 + index as i32);
        let err = Packer::with_runner(&runner)
            .toolchain(external_toc())
            .pack(job.archive(), job.source(), &job.options)
            .unwrap_err();

        assert_eq!(err.exit_code(), Some(40 + index as i32), "stage {call:?}");
        assert_eq!(runner.calls(), ALL_CALLS[..=index], "stage {call:?}");
        job.assert_clean();
    }
}

#[test]
fn test_failed_stage_is_reported() {
    for (call, stage) in ALL_CALLS.iter().zip(Stage::ALL) {
        let job = Job::new();
        let runner = FakeRunner::failing(call.clone(), 1);
        let err = Packer::with_runner(&runner)
            .toolchain(external_toc())
            .pack(job.archive(), job.source(), &job.options)
            .unwrap_err();

        match err {
            Error::ToolFailed { stage: failed, .. } => assert_eq!(failed, stage),
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }
}

#[test]
fn test_signature_size_mismatch_stops_before_inject() {
    let job = Job::new();
    let runner = FakeRunner {
        probe_len: 128,
        toc_sig_len: 127,
        ..FakeRunner::new()
    };
    let err = Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap_err();

    assert!(matches!(
        err,
        Error::SignatureSizeMismatch {
            reserved: 128,
            actual: 127
        }
    ));
    assert!(!runner.calls().contains(&Call::Inject));
    job.assert_clean();
}

#[test]
fn test_empty_probe_output_is_rejected() {
    let job = Job::new();
    let runner = FakeRunner {
        probe_len: 0,
        ..FakeRunner::new()
    };
    let err = Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert!(!runner.calls().contains(&Call::ReplaceSign));
}

#[test]
fn test_size_from_key_skips_probe() {
    let job = Job::new();
    let options = job.options.clone().signature_sizing(SignatureSizing::FromKey);
    let runner = FakeRunner::new();
    Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &options)
        .unwrap();

    assert!(!runner.calls().contains(&Call::SignProbe));
    let replace = runner.invocation(Call::ReplaceSign);
    assert_eq!(FakeRunner::arg_after(&replace, "--sig-size"), PathBuf::from("128"));
}

#[test]
fn test_size_from_ecdsa_key_fails() {
    let job = Job::new();
    let options = job
        .options
        .clone()
        .private_key(fixture("key-p256.pem"))
        .signature_sizing(SignatureSizing::FromKey);
    let runner = FakeRunner::new();
    let err = Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &options)
        .unwrap_err();

    assert!(matches!(err, Error::Key { .. }));
    assert_eq!(runner.calls(), [Call::Create]);
}

#[test]
fn test_builtin_toc_extraction() {
    let job = Job::new();
    let runner = FakeRunner::new();
    Packer::with_runner(&runner)
        .pack(job.archive(), job.source(), &job.options)
        .unwrap();

    assert_eq!(
        runner.calls(),
        [
            Call::Create,
            Call::SignProbe,
            Call::ReplaceSign,
            Call::SignToc,
            Call::Inject
        ]
    );
    let sign = runner.invocation(Call::SignToc);
    assert_eq!(
        PathBuf::from(sign.get_args().last().unwrap()),
        job.temp().join(TOC_FILE)
    );
    job.assert_clean();
}

#[test]
fn test_builtin_toc_rejects_invalid_archive() {
    struct GarbageCreate(FakeRunner);

    impl ToolRunner for GarbageCreate {
        fn run(&self, inv: &Invocation) -> io::Result<ToolOutput> {
            let output = self.0.run(inv)?;
            if FakeRunner::classify(inv) == Call::Create {
                fs::write(FakeRunner::arg_after(inv, "-cf"), b"garbage")?;
            }
            Ok(output)
        }
    }

    let job = Job::new();
    let runner = GarbageCreate(FakeRunner::new());
    let err = Packer::with_runner(&runner)
        .pack(job.archive(), job.source(), &job.options)
        .unwrap_err();

    assert!(matches!(err, Error::Xar(_)));
    assert!(!runner.0.calls().contains(&Call::SignToc));
}

#[test]
fn test_external_toc_runs_in_temp() {
    let job = Job::new();
    let runner = FakeRunner::new();
    Packer::with_runner(&runner)
        .toolchain(external_toc())
        .pack(job.archive(), job.source(), &job.options)
        .unwrap();

    let extract = runner.invocation(Call::ExtractToc);
    assert_eq!(extract.program_name(), "xartool");
    assert_eq!(extract.get_current_dir(), Some(job.temp().as_path()));
    assert_eq!(extract.get_args(), [job.archive().into_os_string()]);
}

#[test]
fn test_missing_root_certificate_runs_nothing() {
    let job = Job::new();
    let options = job.options.clone().apple_root_cer(job.dir.path().join("missing.cer"));
    let runner = FakeRunner::new();
    let err = Packer::with_runner(&runner)
        .pack(job.archive(), job.source(), &options)
        .unwrap_err();

    assert!(matches!(err, Error::MissingCredentials(_)));
    assert!(runner.calls().is_empty());
    assert!(!job.archive().exists());
}

#[test]
fn test_spawn_failure() {
    let job = Job::new();
    let err = Packer::with_runner(NoSuchProgram)
        .pack(job.archive(), job.source(), &job.options)
        .unwrap_err();

    assert_eq!(err.exit_code(), None);
    match err {
        Error::Spawn { program, .. } => assert_eq!(program, "xar"),
        other => panic!("expected Spawn, got {other:?}"),
    }
}

#[test]
fn test_step_by_step() {
    let job = Job::new();
    let runner = FakeRunner::new();
    let packer = Packer::with_runner(&runner).toolchain(external_toc());
    let request = PackRequest::new(job.archive(), job.source(), &job.options).unwrap();
    fs::create_dir_all(&request.temp_dir).unwrap();
    let artifacts = TempArtifacts::new(&request.temp_dir);

    let state = packer.step(&request, &artifacts, PackState::Unsigned).unwrap();
    assert_eq!(state, PackState::Created);
    assert_eq!(runner.calls(), [Call::Create]);

    let state = packer.step(&request, &artifacts, state).unwrap();
    assert_eq!(state, PackState::Sized { sig_size: 128 });

    let state = packer.step(&request, &artifacts, state).unwrap();
    assert_eq!(state, PackState::LeafSigned { sig_size: 128 });
    assert!(artifacts.digest().exists());

    let state = packer.step(&request, &artifacts, state).unwrap();
    assert_eq!(state, PackState::TocExtracted { sig_size: 128 });
    assert!(artifacts.toc().exists());

    let state = packer.step(&request, &artifacts, state).unwrap();
    assert_eq!(state, PackState::TocSigned { sig_size: 128 });
    assert_eq!(fs::read(artifacts.signature()).unwrap(), vec![0x22; 128]);

    let state = packer.step(&request, &artifacts, state).unwrap();
    assert_eq!(state, PackState::Signed { sig_size: 128 });
    assert!(state.is_terminal());

    let again = packer.step(&request, &artifacts, state).unwrap();
    assert_eq!(again, state);
    assert_eq!(runner.calls(), ALL_CALLS);

    drop(artifacts);
    job.assert_clean();
}

#[test]
fn test_state_machine_shape() {
    let mut state = PackState::Unsigned;
    let mut stages = Vec::new();
    while let Some(stage) = state.next_stage() {
        stages.push(stage);
        state = match state {
            PackState::Unsigned => PackState::Created,
            PackState::Created => PackState::Sized { sig_size: 1 },
            PackState::Sized { sig_size } => PackState::LeafSigned { sig_size },
            PackState::LeafSigned { sig_size } => PackState::TocExtracted { sig_size },
            PackState::TocExtracted { sig_size } => PackState::TocSigned { sig_size },
            PackState::TocSigned { sig_size } => PackState::Signed { sig_size },
            PackState::Signed { .. } => unreachable!(),
        };
    }
    assert_eq!(stages, Stage::ALL);
    assert_eq!(PackState::Created.sig_size(), None);
    assert_eq!(PackState::TocSigned { sig_size: 9 }.sig_size(), Some(9));
}

#[test]
fn test_rerun_from_clean_temp() {
    let job = Job::new();
    let runner = FakeRunner::new();
    let packer = Packer::with_runner(&runner).toolchain(external_toc());

    packer.pack(job.archive(), job.source(), &job.options).unwrap();
    packer.pack(job.archive(), job.source(), &job.options).unwrap();

    assert_eq!(runner.calls().len(), ALL_CALLS.len() * 2);
    job.assert_clean();
}

#[test]
fn test_concurrent_runs_with_distinct_temp_dirs() {
    let jobs: Vec<Job> = (0..4).map(|_| Job::new()).collect();
    let runner = FakeRunner::new();
    let packer = Packer::with_runner(&runner).toolchain(external_toc());

    std::thread::scope(|scope| {
        for job in &jobs {
            let packer = &packer;
            scope.spawn(move || {
                packer.pack(job.archive(), job.source(), &job.options).unwrap();
            });
        }
    });

    assert_eq!(runner.calls().len(), ALL_CALLS.len() * jobs.len());
    for job in &jobs {
        assert!(job.archive().exists());
        job.assert_clean();
    }
}
