pub mod bootstrap;
pub mod guard;
pub mod logout;
pub mod store;

pub use bootstrap::{BootstrapOutcome, BootstrapReport, ProfileSource, RenderMode, SessionBootstrapper};
pub use guard::{is_safe_redirect_path, login_location, RouteDecision, RouteGuard};
pub use logout::{GuardPhase, LogoutApi, LogoutOutcome, LogoutProtocol, LogoutRequest, Navigator, TeardownReport, CREDENTIAL_KEYS};
pub use store::{SessionCredential, SessionStore};
