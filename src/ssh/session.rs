use super::provider::{RemoteSession, SessionOptions, SessionProvider};
use crate::error::{Error, Result};
use log::{debug, warn};

/// Opens and authenticates a session for `user` from the target's
/// template. Every failure is reported as [`Error::OpenSession`]; a
/// partially set up session is disconnected first.
pub(crate) fn open_session<P: SessionProvider>(
    provider: &P,
    template: &SessionOptions,
    user: &str,
) -> Result<P::Session> {
    let mut options = template.clone();
    options.user = user.to_owned();

    let mut session = provider.connect(&options).map_err(|e| {
        warn!("Failed to connect to {}:{}: {}", options.host, options.port, e);
        Error::OpenSession
    })?;

    if let Err(e) = session.authenticate(&options) {
        warn!("Failed to authenticate as {}: {}", options.user, e);
        session.disconnect();
        return Err(Error::OpenSession);
    }

    debug!("Session open to {}:{} as {}", options.host, options.port, options.user);
    Ok(session)
}
