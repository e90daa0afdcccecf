//! Host command surface (§6): the request/reply shapes a PC-side tool would
//! exchange with this engine, independent of the transport that carries them.

use crate::error::{Reason, Status};
use crate::framing::ProtocolMode;
use crate::memory::{ConfigPage, TagImage};
use crate::reader::{AuthCommand, NoTearOff, ReaderDriver, TearOffHook};
use crate::io::{FieldControl, Trace, Transceiver};

/// Authentication material accepted by [`ReadArgs`]/[`WriteArgs`].
#[derive(Clone, Copy, Debug)]
pub enum AuthMaterial {
    Key { key: u64, nonce: u32 },
    Challenge { nr_ar: [u8; 8] },
    Password { password: u32 },
    Plain,
}

impl AuthMaterial {
    fn into_command(self) -> AuthCommand {
        match self {
            AuthMaterial::Key { key, nonce } => AuthCommand::Key { key, nonce },
            AuthMaterial::Challenge { nr_ar } => AuthCommand::Challenge { nr_ar },
            AuthMaterial::Password { password } => AuthCommand::Password82xx { password },
            AuthMaterial::Plain => AuthCommand::Plain,
        }
    }
}

/// `LF_HITAGS_READ` request.
#[derive(Clone, Copy, Debug)]
pub struct ReadArgs {
    pub mode: ProtocolMode,
    pub page: u8,
    pub page_count: u8,
    pub auth: AuthMaterial,
}

/// `LF_HITAGS_READ` reply.
#[derive(Clone, Debug)]
pub struct ReadReply {
    pub status: Status,
    pub config_page: Option<ConfigPage>,
    pub pages: Vec<[u8; 4]>,
    pub reasons: Vec<Option<Reason>>,
}

/// `LF_HITAGS_WRITE` request.
#[derive(Clone, Copy, Debug)]
pub struct WriteArgs {
    pub mode: ProtocolMode,
    pub page: u8,
    pub data: [u8; 4],
    pub auth: AuthMaterial,
}

/// `LF_HITAGS_WRITE` reply.
#[derive(Clone, Copy, Debug)]
pub struct WriteReply {
    pub status: Status,
    pub reason: Option<Reason>,
}

/// `LF_HITAGS_UID` reply.
#[derive(Clone, Debug)]
pub struct UidReply {
    pub status: Status,
    pub uid: [u8; 4],
}

/// Run a full Select -> (optional Auth) -> Read sequence and report the
/// result the way the host-facing `LF_HITAGS_READ` command would.
pub fn handle_read<T, Tr, F>(driver: &mut ReaderDriver<T, Tr, F>, args: ReadArgs) -> ReadReply
where
    T: Transceiver,
    Tr: Trace,
    F: FieldControl,
{
    let uid = match driver.select() {
        Ok(uid) => uid,
        Err(e) => {
            return ReadReply {
                status: e.status,
                config_page: None,
                pages: Vec::new(),
                reasons: Vec::new(),
            }
        }
    };

    if !matches!(args.auth, AuthMaterial::Plain) {
        if let Err(e) = driver.authenticate(uid, args.auth.into_command()) {
            return ReadReply {
                status: e.status,
                config_page: driver.config(),
                pages: Vec::new(),
                reasons: vec![e.reason],
            };
        }
    }

    let outcome = driver.read(args.page, args.page_count);
    ReadReply {
        status: Status::Success,
        config_page: driver.config(),
        pages: outcome.pages,
        reasons: outcome.reasons,
    }
}

/// Run Select -> (optional Auth) -> Write and report the result the way the
/// host-facing `LF_HITAGS_WRITE` command would. `tearoff` defaults to a
/// no-op hook for normal writes; pass a real hook to exercise fault
/// injection.
pub fn handle_write<T, Tr, F>(
    driver: &mut ReaderDriver<T, Tr, F>,
    args: WriteArgs,
    tearoff: &mut dyn TearOffHook,
) -> WriteReply
where
    T: Transceiver,
    Tr: Trace,
    F: FieldControl,
{
    let uid = match driver.select() {
        Ok(uid) => uid,
        Err(e) => {
            return WriteReply {
                status: e.status,
                reason: e.reason,
            }
        }
    };

    if !matches!(args.auth, AuthMaterial::Plain) {
        if let Err(e) = driver.authenticate(uid, args.auth.into_command()) {
            return WriteReply {
                status: e.status,
                reason: e.reason,
            };
        }
    }

    match driver.write_page(args.page, args.data, tearoff) {
        Ok(()) => WriteReply {
            status: Status::Success,
            reason: None,
        },
        Err(e) => WriteReply {
            status: e.status,
            reason: e.reason,
        },
    }
}

/// `LF_HITAGS_UID`: select and report just the UID.
pub fn handle_uid<T, Tr, F>(driver: &mut ReaderDriver<T, Tr, F>) -> UidReply
where
    T: Transceiver,
    Tr: Trace,
    F: FieldControl,
{
    match driver.select() {
        Ok(uid) => UidReply {
            status: Status::Success,
            uid,
        },
        Err(e) => UidReply {
            status: e.status,
            uid: [0; 4],
        },
    }
}

/// `LF_HITAGS_TEST_TRACES`: replay a captured set of NrAr challenges.
pub fn handle_test_traces<T, Tr, F>(
    driver: &mut ReaderDriver<T, Tr, F>,
    challenges: &[[u8; 8]],
) -> Status
where
    T: Transceiver,
    Tr: Trace,
    F: FieldControl,
{
    let results = driver.challenge_sweep(challenges);
    if results.iter().all(Result::is_ok) {
        Status::Success
    } else {
        Status::ErfTrans
    }
}

/// `LF_HITAGS_SIMULATE` arguments: an optionally caller-supplied tag image.
#[derive(Clone, Debug)]
pub struct SimulateArgs {
    pub threshold: i8,
    pub image: TagImage,
}

/// `handle_write` with a no-op tear-off hook, for ordinary (non-fault-injection) writes.
pub fn handle_write_plain<T, Tr, F>(driver: &mut ReaderDriver<T, Tr, F>, args: WriteArgs) -> WriteReply
where
    T: Transceiver,
    Tr: Trace,
    F: FieldControl,
{
    handle_write(driver, args, &mut NoTearOff)
}

/// `LF_HITAGS_TEST_TRACES` request: a captured set of NrAr challenges to replay.
#[derive(Clone, Debug)]
pub struct ChallengeSweepArgs {
    pub challenges: Vec<[u8; 8]>,
}

/// One request from the external host command surface, named after the
/// reference firmware's `LF_HITAGS_*` command identifiers.
#[derive(Clone, Debug)]
pub enum HostCommand {
    LfHitagSUid,
    LfHitagSRead(ReadArgs),
    LfHitagSWrite(WriteArgs),
    LfHitagSSimulate(SimulateArgs),
    LfHitagSTestTraces(ChallengeSweepArgs),
}

/// Reply shapes returned by [`dispatch`], one per [`HostCommand`] variant.
#[derive(Clone, Debug)]
pub enum HostReply {
    Uid(UidReply),
    Read(ReadReply),
    Write(WriteReply),
    TestTraces(Status),
}

/// Dispatch one [`HostCommand`] against a live reader session.
///
/// `LfHitagSSimulate` has no reply through a `ReaderDriver`: running the tag
/// simulator loop against a live transceiver is a caller composition of
/// `TagResponder`/`io::Transceiver`/`io::FieldControl` (see `SimulateArgs`),
/// so dispatching it here is a no-op that returns `None`.
pub fn dispatch<T, Tr, F>(driver: &mut ReaderDriver<T, Tr, F>, cmd: HostCommand) -> Option<HostReply>
where
    T: Transceiver,
    Tr: Trace,
    F: FieldControl,
{
    match cmd {
        HostCommand::LfHitagSUid => Some(HostReply::Uid(handle_uid(driver))),
        HostCommand::LfHitagSRead(args) => Some(HostReply::Read(handle_read(driver, args))),
        HostCommand::LfHitagSWrite(args) => Some(HostReply::Write(handle_write_plain(driver, args))),
        HostCommand::LfHitagSTestTraces(args) => {
            Some(HostReply::TestTraces(handle_test_traces(driver, &args.challenges)))
        }
        HostCommand::LfHitagSSimulate(_) => None,
    }
}
