mod member;
pub use member::GuildMember;

mod member_snapshot;
pub use member_snapshot::MemberSnapshot;
