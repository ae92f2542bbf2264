//! Gameplay verification: replay the submitted log and check the claim
//!
//! The replay runs as an external process, so the log and both output
//! artifacts are exchanged through scratch files. Those files are
//! [`TempPath`]s and are removed when dropped, on every return path.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use alloy_primitives::Address;
use regex::Regex;
use tempfile::{Builder, TempPath};
use tracing::{debug, info};

use crate::emulator::{Emulator, ReplayExit, ReplayInvocation};
use crate::error::VerificationError;
use crate::types::{AdvanceRequest, GameplayClaim, OUTHASH_SIZE};

/// Score on success, failure kind otherwise
pub type VerificationOutcome = Result<i64, VerificationError>;

pub struct GameplayVerifier<E> {
    emulator: E,
    cartridge: PathBuf,
    scratch_dir: PathBuf,
}

impl<E: Emulator> GameplayVerifier<E> {
    pub fn new(emulator: E, cartridge: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            emulator,
            cartridge: cartridge.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn emulator(&self) -> &E {
        &self.emulator
    }

    /// Verify an advance request carrying a gameplay submission
    pub async fn verify(&self, request: &AdvanceRequest) -> VerificationOutcome {
        let claim = GameplayClaim::parse(&request.payload)?;
        self.verify_claim(&claim, &request.metadata.msg_sender).await
    }

    /// Replay the claim's log with the sender as entropy, check the output
    /// digest against the claim and extract the score.
    pub async fn verify_claim(&self, claim: &GameplayClaim<'_>, sender: &Address) -> VerificationOutcome {
        let entropy = entropy_seed(sender);
        debug!("Msg sender entropy: {}", entropy);

        let scratch = ScratchFiles::stage(&self.scratch_dir, claim.gameplay_log)?;
        let invocation = ReplayInvocation {
            cartridge: self.cartridge.clone(),
            replay_log: scratch.replay_log.to_path_buf(),
            outcard: scratch.outcard.to_path_buf(),
            outhash: scratch.outhash.to_path_buf(),
            entropy,
        };

        match self.emulator.run(&invocation).await? {
            ReplayExit::Completed => {}
            ReplayExit::Failed { code: Some(code) } => {
                return Err(VerificationError::Replay(format!("replay exited with code {}", code)));
            }
            ReplayExit::Failed { code: None } => {
                return Err(VerificationError::Replay("replay terminated by signal".to_string()));
            }
            ReplayExit::TimedOut(limit) => {
                return Err(VerificationError::Replay(format!("replay timed out after {:?}", limit)));
            }
        }

        let outhash = read_outhash(&scratch.outhash).await?;
        if outhash != claim.outhash {
            return Err(VerificationError::OutHashMismatch {
                received: hex::encode(outhash),
            });
        }

        let outcard = tokio::fs::read_to_string(&scratch.outcard)
            .await
            .map_err(VerificationError::file("error reading outcard file"))?;
        debug!("Outcard: {}", outcard);

        let score = extract_score(&outcard)?;
        info!("Gameplay verified with score {}", score);
        Ok(score)
    }
}

/// Sender address as `0x`-prefixed lowercase hex
pub fn entropy_seed(sender: &Address) -> String {
    format!("0x{}", hex::encode(sender.as_slice()))
}

/// Uniquely named scratch files for one replay
struct ScratchFiles {
    replay_log: TempPath,
    outcard: TempPath,
    outhash: TempPath,
}

impl ScratchFiles {
    fn stage(dir: &Path, gameplay_log: &[u8]) -> Result<Self, VerificationError> {
        let outcard = scratch_file(dir, "outcard")
            .map_err(VerificationError::file("error opening outcard temp file"))?
            .into_temp_path();
        let outhash = scratch_file(dir, "outhash")
            .map_err(VerificationError::file("error opening outhash temp file"))?
            .into_temp_path();

        let mut replay_log = scratch_file(dir, "gamelog")
            .map_err(VerificationError::file("error opening gameplay log temp file"))?;
        replay_log
            .write_all(gameplay_log)
            .and_then(|_| replay_log.flush())
            .map_err(VerificationError::file("error writing gameplay log temp file"))?;

        Ok(Self {
            replay_log: replay_log.into_temp_path(),
            outcard,
            outhash,
        })
    }
}

fn scratch_file(dir: &Path, prefix: &str) -> std::io::Result<tempfile::NamedTempFile> {
    Builder::new().prefix(prefix).tempfile_in(dir)
}

async fn read_outhash(path: &Path) -> Result<[u8; OUTHASH_SIZE], VerificationError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(VerificationError::file("error reading outhash file"))?;

    let line = contents.lines().next().unwrap_or_default().trim();
    let line = line.strip_prefix("0x").unwrap_or(line);
    let bytes = hex::decode(line).map_err(|e| VerificationError::MalformedOutHash(format!("{}: {:?}", e, line)))?;

    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| VerificationError::MalformedOutHash(format!("expected 32 bytes, got {}", bytes.len())))
}

fn score_pattern() -> &'static Regex {
    static SCORE_PATTERN: OnceLock<Regex> = OnceLock::new();
    SCORE_PATTERN.get_or_init(|| Regex::new(r#""score":\s*(-?\d+)\s*,"#).expect("score pattern is a valid regex"))
}

/// Find `"score": <integer>,` in the outcard
pub fn extract_score(outcard: &str) -> VerificationOutcome {
    let captures = score_pattern()
        .captures(outcard)
        .ok_or(VerificationError::ScoreNotFound)?;
    let score = &captures[1];
    debug!("Score match: {}", &captures[0]);

    score
        .parse::<i64>()
        .map_err(|e| VerificationError::InvalidScore(format!("{}: {}", score, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use crate::testing::ScriptedEmulator;
    use crate::types::AdvanceMetadata;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;

    const DIGEST: [u8; 32] = [0x5a; 32];

    struct FailingSpawn;

    #[async_trait]
    impl Emulator for FailingSpawn {
        async fn run(&self, _: &ReplayInvocation) -> Result<ReplayExit, VerificationError> {
            Err(VerificationError::Fork {
                program: "/rivos/usr/sbin/riv-chroot".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
        }
    }

    fn request(log_len: usize) -> AdvanceRequest {
        let mut payload = DIGEST.to_vec();
        payload.extend((0..log_len).map(|i| i as u8));
        AdvanceRequest {
            metadata: AdvanceMetadata {
                msg_sender: "0xdeadbeef7dc51b33c9a3e4a21ae053daa1872810".parse().unwrap(),
                epoch_index: 0,
                input_index: 1,
                block_number: 10,
                timestamp: 1700000000,
            },
            payload,
        }
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_entropy_seed() {
        let sender: Address = "0xDEADBEEF7dc51b33c9a3e4a21ae053daa1872810".parse().unwrap();
        assert_eq!(entropy_seed(&sender), "0xdeadbeef7dc51b33c9a3e4a21ae053daa1872810");
    }

    #[test]
    fn test_extract_score() {
        assert_eq!(extract_score(r#"{"score": 42,}"#).unwrap(), 42);
        assert_eq!(extract_score("{\"level\":3,\"score\":\n 99983 , \"x\":1}").unwrap(), 99983);
        assert_eq!(extract_score(r#"{"score": -7, "x": 1}"#).unwrap(), -7);
    }

    #[test]
    fn test_extract_score_failures() {
        assert!(matches!(extract_score(r#"{"level": 3}"#), Err(VerificationError::ScoreNotFound)));
        // Last field has no trailing comma
        assert!(matches!(extract_score(r#"{"score": 3}"#), Err(VerificationError::ScoreNotFound)));
        assert!(matches!(
            extract_score(r#"{"score": 99999999999999999999,}"#),
            Err(VerificationError::InvalidScore(_))
        ));
    }

    #[tokio::test]
    async fn test_successful_verification() {
        let scratch = tempfile::tempdir().unwrap();
        let emulator = ScriptedEmulator::completing(&hex::encode(DIGEST), r#"{"score": 42,}"#);
        let verifier = GameplayVerifier::new(emulator, "/cartridges/freedoom.sqfs", scratch.path());

        let score = verifier.verify(&request(20)).await.unwrap();
        assert_eq!(score, 42);
        assert!(scratch_is_empty(scratch.path()));

        let invocations = verifier.emulator.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].entropy, "0xdeadbeef7dc51b33c9a3e4a21ae053daa1872810");
        assert_eq!(invocations[0].cartridge, PathBuf::from("/cartridges/freedoom.sqfs"));
        assert_ne!(invocations[0].outcard, invocations[0].outhash);
    }

    #[tokio::test]
    async fn test_replay_log_excludes_digest() {
        struct CapturingEmulator(Mutex<Vec<u8>>);

        #[async_trait]
        impl Emulator for CapturingEmulator {
            async fn run(&self, invocation: &ReplayInvocation) -> Result<ReplayExit, VerificationError> {
                *self.0.lock().unwrap() = fs::read(&invocation.replay_log).unwrap();
                Ok(ReplayExit::Failed { code: Some(1) })
            }
        }

        let scratch = tempfile::tempdir().unwrap();
        let verifier = GameplayVerifier::new(CapturingEmulator(Mutex::new(Vec::new())), "cart", scratch.path());
        let request = request(20);

        let _ = verifier.verify(&request).await;
        assert_eq!(*verifier.emulator.0.lock().unwrap(), request.payload[32..].to_vec());
    }

    #[tokio::test]
    async fn test_outhash_with_prefix_and_newline() {
        let scratch = tempfile::tempdir().unwrap();
        let outhash = format!("0x{}\n", hex::encode(DIGEST));
        let emulator = ScriptedEmulator::completing(&outhash, r#"{"score": 1,}"#);
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path());

        assert_eq!(verifier.verify(&request(16)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_payload_size_errors_leave_no_scratch_files() {
        let scratch = tempfile::tempdir().unwrap();
        let emulator = ScriptedEmulator::completing(&hex::encode(DIGEST), r#"{"score": 42,}"#);
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path());

        let err = verifier.verify(&request(15)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::InputError);

        let err = verifier.verify(&request(1024 * 1024)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::InputError);

        assert!(scratch_is_empty(scratch.path()));
        assert!(verifier.emulator.invocations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outhash_mismatch() {
        let scratch = tempfile::tempdir().unwrap();
        let other = hex::encode([0x11u8; 32]);
        let emulator = ScriptedEmulator::completing(&other, r#"{"score": 42,}"#);
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path());

        let err = verifier.verify(&request(20)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::OutHashError);
        assert!(err.to_string().contains(&other));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_replay_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let emulator = ScriptedEmulator::exiting(ReplayExit::Failed { code: Some(9) });
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path());

        let err = verifier.verify(&request(20)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::VerificationError);
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_replay_timeout_is_verification_error() {
        let scratch = tempfile::tempdir().unwrap();
        let emulator = ScriptedEmulator::exiting(ReplayExit::TimedOut(std::time::Duration::from_secs(5)));
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path());

        let err = verifier.verify(&request(20)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::VerificationError);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let verifier = GameplayVerifier::new(FailingSpawn, "cart", scratch.path());

        let err = verifier.verify(&request(20)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::ForkError);
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_missing_score() {
        let scratch = tempfile::tempdir().unwrap();
        let emulator = ScriptedEmulator::completing(&hex::encode(DIGEST), r#"{"frames": 100,}"#);
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path());

        let err = verifier.verify(&request(20)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::OutcardError);
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_malformed_outhash_is_file_error() {
        let scratch = tempfile::tempdir().unwrap();
        let emulator = ScriptedEmulator::completing("not-hex", r#"{"score": 42,}"#);
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path());

        let err = verifier.verify(&request(20)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FileError);

        let emulator = ScriptedEmulator::completing("abcd", r#"{"score": 42,}"#);
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path());
        let err = verifier.verify(&request(20)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FileError);
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn test_missing_scratch_dir_is_file_error() {
        let scratch = tempfile::tempdir().unwrap();
        let emulator = ScriptedEmulator::completing(&hex::encode(DIGEST), r#"{"score": 42,}"#);
        let verifier = GameplayVerifier::new(emulator, "cart", scratch.path().join("missing"));

        let err = verifier.verify(&request(20)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FileError);
    }
}
