//! `tessera-membership`: the two ways into an organization: a verified email domain
//! or an accepted invitation. Both end in relation writes through `tessera-authz`.

pub mod dns;
pub mod domain;
pub mod email;
pub mod invitation;
pub mod members;
pub mod settings;
pub mod user;

pub use dns::{LookupError, TxtResolver};
pub use domain::{Domain, DomainFilter, DomainRepository, DomainService, DomainState};
pub use email::email_domain;
pub use invitation::{
    Invitation, InvitationFilter, InvitationRepository, InvitationService, NewInvitation,
};
pub use settings::MembershipSettings;
pub use user::{User, UserDirectory};
