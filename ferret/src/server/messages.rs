//! Protocol message and reply codes.
//!
//! Codes are wire bytes; the enums exist so dispatch reads like the
//! protocol tables and unknown bytes fail loudly.

/// Remote protocol version advertised in the first `Update` reply.
pub const PROTOCOL_MAJOR_VERSION: u8 = 42;
pub const PROTOCOL_MINOR_VERSION: u8 = 0;

macro_rules! protocol_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = crate::net::Error;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                $(
                    if code == $value {
                        return Ok(Self::$variant);
                    }
                )+
                Err(crate::net::Error::UnknownMessage(code))
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }
    };
}

protocol_enum! {
    /// Requests a remote-protocol client can send.
    RemoteMessage {
        AllTerms = 0,
        CollFreq = 1,
        Document = 2,
        TermExists = 3,
        TermFreq = 4,
        ValueStats = 5,
        KeepAlive = 6,
        DocLength = 7,
        Query = 8,
        TermList = 9,
        PositionList = 10,
        PostList = 11,
        Reopen = 12,
        Update = 13,
        AddDocument = 14,
        Cancel = 15,
        DeleteDocumentTerm = 16,
        Commit = 17,
        ReplaceDocument = 18,
        ReplaceDocumentTerm = 19,
        DeleteDocument = 20,
        WriteAccess = 21,
        GetMetadata = 22,
        SetMetadata = 23,
        AddSpelling = 24,
        RemoveSpelling = 25,
        GetMset = 26,
        Shutdown = 27,
        MetadataKeyList = 28,
        Freqs = 29,
        UniqueTerms = 30,
        PositionListCount = 31,
        ReadAccess = 32,
    }
}

protocol_enum! {
    /// Replies the remote-protocol server sends.
    RemoteReply {
        Update = 0,
        Exception = 1,
        Done = 2,
        AllTerms = 3,
        CollFreq = 4,
        DocData = 5,
        TermDoesntExist = 6,
        TermExists = 7,
        TermFreq = 8,
        ValueStats = 9,
        DocLength = 10,
        Stats = 11,
        TermList = 12,
        PositionList = 13,
        PostListStart = 14,
        PostListItem = 15,
        Value = 16,
        AddDocument = 17,
        Results = 18,
        Metadata = 19,
        MetadataKeyList = 20,
        Freqs = 21,
        UniqueTerms = 22,
        PositionListCount = 23,
        RemoveSpelling = 24,
        TermList0 = 25,
    }
}

protocol_enum! {
    /// Requests a replication client can send.
    ReplicationMessage {
        GetChangesets = 0,
    }
}

protocol_enum! {
    /// Replies the replication server sends.
    ReplicationReply {
        Welcome = 0,
        Exception = 1,
        EndOfChanges = 2,
        Fail = 3,
        DbHeader = 4,
        DbFilename = 5,
        DbFiledata = 6,
        DbFooter = 7,
        Changeset = 8,
    }
}

/// Remote connection state. INIT transitions exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    InitRemote,
    RemoteServer,
}

/// Replication connection state. INIT transitions exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    InitReplicationClient,
    InitReplicationServer,
    ReplicationClient,
    ReplicationServer,
}
