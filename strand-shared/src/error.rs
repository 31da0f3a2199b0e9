use std::io;
use std::net;
use std::num::ParseIntError;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer too small")]
    ErrBufferTooSmall,
    #[error("too short buffer")]
    ErrShortBuffer,
    #[error("packet too big")]
    ErrPacketTooBig,
    #[error("i/o timeout")]
    ErrTimeout,
    #[error("already closed")]
    ErrAlreadyClosed,
    #[error("use of closed connection")]
    ErrUseClosedConnection,
    #[error("failed to parse address")]
    ErrAddressParseFailed,

    // STUN
    #[error("attribute not found")]
    ErrAttributeNotFound,
    #[error("unexpected EOF: not enough bytes to read header")]
    ErrUnexpectedHeaderEof,
    #[error("attribute size is invalid")]
    ErrAttributeSizeInvalid,
    #[error("attribute size overflow")]
    ErrAttributeSizeOverflow,
    #[error("invalid magic cookie")]
    ErrInvalidMagicCookie,
    #[error("integrity check failed")]
    ErrIntegrityMismatch,
    #[error("fingerprint check failed")]
    ErrFingerprintMismatch,
    #[error("FINGERPRINT before MESSAGE-INTEGRITY attribute")]
    ErrFingerprintBeforeIntegrity,
    #[error("bad UNKNOWN-ATTRIBUTES size")]
    ErrBadUnknownAttrsSize,
    #[error("invalid length of IP value")]
    ErrBadIpLength,
    #[error("unknown comprehension-required attribute {0:#06x}")]
    ErrUnknownComprehensionRequired(u16),
    #[error("no default reason for ErrorCode")]
    ErrNoDefaultReason,

    // SDP
    #[error("sdp: invalid syntax: {0}")]
    SdpInvalidSyntax(String),
    #[error("sdp: invalid value: {0}")]
    SdpInvalidValue(String),

    // ICE
    #[error("unknown candidate type")]
    ErrUnknownCandidateType,
    #[error("attribute not long enough to be ICE candidate")]
    ErrAttributeTooShortIceCandidate,
    #[error("could not parse component")]
    ErrParseComponent,
    #[error("could not parse priority")]
    ErrParsePriority,
    #[error("could not parse port")]
    ErrParsePort,
    #[error("could not parse related addresses")]
    ErrParseRelatedAddr,
    #[error("could not parse type")]
    ErrParseType,
    #[error("remote ufrag is empty")]
    ErrRemoteUfragEmpty,
    #[error("remote pwd is empty")]
    ErrRemotePwdEmpty,
    #[error("username mismatch")]
    ErrMismatchUsername,
    #[error("unknown role")]
    ErrUnknownRole,
    #[error("no candidate pairs available")]
    ErrNoCandidatePairs,
    #[error("ICE agent can not be restarted when gathering")]
    ErrRestartWhenGathering,
    #[error("attempting to gather candidates during gathering state")]
    ErrMultipleGatherAttempted,
    #[error("unknown scheme type")]
    ErrSchemeType,
    #[error("invalid hostname")]
    ErrHost,
    #[error("url parse: invalid port number")]
    ErrPort,
    #[error("agent is closed")]
    ErrAgentClosed,

    // DTLS
    #[error("conn is closed")]
    ErrConnClosed,
    #[error("handshake is in progress")]
    ErrHandshakeInProgress,
    #[error("handshake timed out")]
    ErrHandshakeTimeout,
    #[error("invalid content type")]
    ErrInvalidContentType,
    #[error("invalid mac")]
    ErrInvalidMac,
    #[error("packet is too short")]
    ErrDtlsPacketInvalidLength,
    #[error("packet length and declared length do not match")]
    ErrInvalidPacketLength,
    #[error("sequence number overflow")]
    ErrSequenceNumberOverflow,
    #[error("invalid or unknown cipher suite")]
    ErrInvalidCipherSuite,
    #[error("client+server do not support any shared cipher suites")]
    ErrCipherSuiteNoIntersection,
    #[error("server hello can not be created without a cipher suite")]
    ErrCipherSuiteUnset,
    #[error("server hello can not be created without a compression method")]
    ErrCompressionMethodUnset,
    #[error("client+server cookie does not match")]
    ErrCookieMismatch,
    #[error("cookie must not be longer then 255 bytes")]
    ErrCookieTooLong,
    #[error("no certificate provided")]
    ErrInvalidCertificate,
    #[error("invalid or unknown elliptic curve type")]
    ErrInvalidEllipticCurveType,
    #[error("invalid named curve")]
    ErrInvalidNamedCurve,
    #[error("invalid hash algorithm")]
    ErrInvalidHashAlgorithm,
    #[error("invalid signature algorithm")]
    ErrInvalidSignatureAlgorithm,
    #[error("expected and actual key signature do not match")]
    ErrKeySignatureMismatch,
    #[error("connection can not be created, no CipherSuites satisfy this Config")]
    ErrNoAvailableCipherSuites,
    #[error("no certificates configured")]
    ErrNoCertificates,
    #[error("client requested zero or more elliptic curves that are not supported by the server")]
    ErrNoSupportedEllipticCurves,
    #[error("unsupported protocol version")]
    ErrUnsupportedProtocolVersion,
    #[error("expected and actual verify data does not match")]
    ErrVerifyDataMismatch,
    #[error("invalid state machine transition")]
    ErrInvalidFsmTransition,
    #[error("ApplicationData with epoch of 0")]
    ErrApplicationDataEpochZero,
    #[error("unhandled contentType")]
    ErrUnhandledContextType,
    #[error("empty fragment")]
    ErrEmptyFragment,
    #[error("Alert is Fatal or Close Notify")]
    ErrAlertFatalOrClose,
    #[error("client requested SRTP but we have no matching profiles")]
    ErrServerNoMatchingSrtpProfile,
    #[error("server responded with SRTP Profile we do not support")]
    ErrClientNoMatchingSrtpProfile,
    #[error("SRTP support was requested but server did not respond with use_srtp extension")]
    ErrRequestedButNoSrtpExtension,
    #[error("client required Extended Master Secret extension, but server does not support it")]
    ErrClientRequiredButNoServerEms,
    #[error("server requires the Extended Master Secret extension, but the client does not support it")]
    ErrServerRequiredButNoClientEms,
    #[error("handshake message unset, unable to marshal")]
    ErrHandshakeMessageUnset,
    #[error("data length and declared length do not match")]
    ErrLengthMismatch,
    #[error("buffer not long enough to contain nonce")]
    ErrNotEnoughRoomForNonce,
    #[error("context is not supported for export_keying_material")]
    ErrContextUnsupported,
    #[error("export_keying_material can not be used with a reserved label")]
    ErrReservedExportKeyingMaterial,
    #[error("unable to verify key signature: no peer public key")]
    ErrNoPeerPublicKey,

    // SRTP
    #[error("duplicated packet")]
    ErrDuplicated,
    #[error("SRTP master key is not long enough")]
    ErrShortSrtpMasterKey,
    #[error("SRTP master salt is not long enough")]
    ErrShortSrtpMasterSalt,
    #[error("no such SRTP Profile")]
    ErrNoSuchSrtpProfile,
    #[error("exporter called with wrong label")]
    ErrExporterWrongLabel,
    #[error("failed to verify auth tag")]
    ErrFailedToVerifyAuthTag,
    #[error("packet is too short to be RTP packet")]
    ErrTooShortRtp,
    #[error("packet is too short to be RTCP packet")]
    ErrTooShortRtcp,
    #[error("srtp ssrc={0} index={1}: duplicated")]
    SrtpSsrcDuplicated(u32, u16),
    #[error("srtcp ssrc={0} index={1}: duplicated")]
    SrtcpSsrcDuplicated(u32, usize),

    // RTP
    #[error("RTP header size insufficient")]
    ErrHeaderSizeInsufficient,
    #[error("RTP header size insufficient for extension")]
    ErrHeaderSizeInsufficientForExtension,
    #[error("extension not enabled")]
    ErrHeaderExtensionsNotEnabled,
    #[error("extension not found")]
    ErrHeaderExtensionNotFound,
    #[error("header extension id must be between 1 and 14 for RFC 5285 one byte extensions")]
    ErrRfc8285OneByteHeaderIdRange,
    #[error("header extension payload must be 16bytes or less for RFC 5285 one byte extensions")]
    ErrRfc8285OneByteHeaderSize,
    #[error("header extension id must be between 1 and 255 for RFC 5285 two byte extensions")]
    ErrRfc8285TwoByteHeaderIdRange,
    #[error("header extension payload must be 255bytes or less for RFC 5285 two byte extensions")]
    ErrRfc8285TwoByteHeaderSize,
    #[error("header extension id must be 0 for non RFC 5285 extensions")]
    ErrRfc3550HeaderIdRange,
    #[error("packet is not large enough")]
    ErrShortPacket,
    #[error("payload is not large enough")]
    PayloadIsNotLargeEnough,
    #[error("nalu type {0} is currently not handled")]
    NaluTypeIsNotHandled(u8),
    #[error("STAP-A declared size({0}) is larger than buffer({1})")]
    StapASizeLargerThanBuffer(usize, usize),
    #[error("payload is too small for OBU extension header")]
    ErrPayloadTooSmallForObuExtensionHeader,
    #[error("payload is too small for OBU payload size")]
    ErrPayloadTooSmallForObuPayloadSize,

    // RTCP
    #[error("wrong marshal size")]
    WrongMarshalSize,
    #[error("invalid total lost count")]
    InvalidTotalLost,
    #[error("invalid header")]
    InvalidHeader,
    #[error("empty compound packet")]
    EmptyCompound,
    #[error("first packet in compound must be SR or RR")]
    BadFirstPacket,
    #[error("compound missing SourceDescription with CNAME")]
    MissingCname,
    #[error("feedback packet seen before CNAME")]
    PacketBeforeCname,
    #[error("too many reports")]
    TooManyReports,
    #[error("too many chunks")]
    TooManyChunks,
    #[error("too many sources")]
    TooManySources,
    #[error("packet too short to be read")]
    PacketTooShort,
    #[error("wrong packet type")]
    WrongType,
    #[error("SDES must be < 255 octets long")]
    SdesTextTooLong,
    #[error("SDES item missing type")]
    SdesMissingType,
    #[error("reason must be < 255 octets long")]
    ReasonTooLong,
    #[error("invalid packet version")]
    BadVersion,
    #[error("invalid padding value")]
    WrongPadding,
    #[error("wrong feedback message type")]
    WrongFeedbackType,
    #[error("wrong payload type")]
    WrongPayloadType,
    #[error("header length is too small")]
    HeaderTooSmall,
    #[error("media SSRC must be 0")]
    SsrcMustBeZero,
    #[error("missing REMB identifier")]
    MissingRembIdentifier,
    #[error("SSRC num and length do not match")]
    SsrcNumAndLengthMismatch,
    #[error("invalid size or startIndex")]
    InvalidSizeOrStartIndex,
    #[error("delta exceed limit")]
    DeltaExceedLimit,
    #[error("packet status chunk must be 2 bytes")]
    PacketStatusChunkLength,
    #[error("invalid bitrate")]
    InvalidBitrate,
    #[error("wrong chunk type")]
    WrongChunkType,
    #[error("invalid block size")]
    InvalidBlockSize,

    // SCTP
    #[error("raw is too small for a SCTP chunk")]
    ErrChunkHeaderTooSmall,
    #[error("not enough data left in SCTP packet to satisfy requested length")]
    ErrChunkHeaderNotEnoughSpace,
    #[error("chunk has invalid length")]
    ErrChunkHeaderInvalidLength,
    #[error("chunk too short")]
    ErrChunkTooShort,
    #[error("chunk value isn't long enough for mandatory parameters")]
    ErrChunkValueNotLongEnough,
    #[error("raw is smaller than the minimum length for a SCTP packet")]
    ErrPacketRawTooSmall,
    #[error("unable to parse SCTP chunk, not enough data for complete header")]
    ErrParseSctpChunkNotEnoughData,
    #[error("failed to unmarshal, contains unknown chunk type")]
    ErrUnmarshalUnknownChunkType,
    #[error("checksum mismatch theirs")]
    ErrChecksumMismatch,
    #[error("sctp packet must not have a source port of 0")]
    ErrSctpPacketSourcePortZero,
    #[error("sctp packet must not have a destination port of 0")]
    ErrSctpPacketDestinationPortZero,
    #[error("init chunk must not be bundled with any other chunk")]
    ErrInitChunkBundled,
    #[error("init chunk expects a verification tag of 0 on the packet when out-of-the-blue")]
    ErrInitChunkVerifyTagNotZero,
    #[error("INIT ACK inbound stream request must be > 0")]
    ErrInitInboundStreamRequestZero,
    #[error("INIT ACK outbound stream request must be > 0")]
    ErrInitOutboundStreamRequestZero,
    #[error("INIT ACK Advertised Receiver Window Credit (a_rwnd) must be >= 1500")]
    ErrInitAdvertisedReceiver1500,
    #[error("no cookie in InitAck")]
    ErrInitAckNoCookie,
    #[error("param header too short")]
    ErrParamHeaderTooShort,
    #[error("param self reported length is shorter than header length")]
    ErrParamHeaderSelfReportedLengthShorter,
    #[error("unhandled ParamType: {typ}")]
    ErrParamTypeUnhandled { typ: u16 },
    #[error("outgoing SSN reset request parameter too short")]
    ErrSsnResetRequestParamTooShort,
    #[error("reconfig response parameter too short")]
    ErrReconfigRespParamTooShort,
    #[error("abort chunk, with following errors: {0}")]
    ErrAbortChunk(String),
    #[error("shutdown called in non-Established state")]
    ErrShutdownNonEstablished,
    #[error("association closed before connecting")]
    ErrAssociationClosedBeforeConn,
    #[error("association handshake failed (INIT ACK)")]
    ErrHandshakeInitAck,
    #[error("association handshake failed (COOKIE ECHO)")]
    ErrHandshakeCookieEcho,
    #[error("sending payload data in non-Established state")]
    ErrPayloadDataStateNotExist,
    #[error("stream closed")]
    ErrStreamClosed,
    #[error("stream not existed")]
    ErrStreamNotExisted,
    #[error("there already exists a stream with identifier")]
    ErrStreamAlreadyExist,
    #[error("outbound packet larger than maximum message size")]
    ErrOutboundPacketTooLarge,
    #[error("sending reset packet in non-Established state")]
    ErrResetPacketInStateNotExist,

    // Data channel
    #[error("DataChannel message is not long enough to determine type: (expected: {expected}, actual: {actual})")]
    UnexpectedEndOfBuffer { expected: usize, actual: usize },
    #[error("unknown MessageType {0}")]
    InvalidMessageType(u8),
    #[error("unknown ChannelType {0}")]
    InvalidChannelType(u8),
    #[error("unknown PayloadProtocolIdentifier {0}")]
    InvalidPayloadProtocolIdentifier(u32),
    #[error("data channel is not open")]
    ErrDataChannelClosed,
    #[error("data channel label exceeds size limit")]
    ErrStringSizeLimit,
    #[error("protocol is larger then 65535 bytes")]
    ErrProtocolTooLarge,
    #[error("negotiated set without channel id")]
    ErrNegotiatedWithoutID,
    #[error("both max_packet_life_time and max_retransmits was set")]
    ErrRetransmitsOrPacketLifeTime,
    #[error("all data channel stream ids in use")]
    ErrMaxDataChannelID,

    // Session
    #[error("connection closed")]
    ErrConnectionClosed,
    #[error("operation can not be run in current signaling state")]
    ErrIncorrectSignalingState,
    #[error("remote description is not set")]
    ErrNoRemoteDescription,
    #[error("codec not found")]
    ErrCodecNotFound,
    #[error("set_remote_description called with no fingerprint")]
    ErrSessionDescriptionNoFingerprint,
    #[error("set_remote_description called with an invalid fingerprint")]
    ErrSessionDescriptionInvalidFingerprint,
    #[error("set_remote_description called with no ice-ufrag")]
    ErrSessionDescriptionMissingIceUfrag,
    #[error("set_remote_description called with no ice-pwd")]
    ErrSessionDescriptionMissingIcePwd,
    #[error("track already exists")]
    ErrExistingTrack,
    #[error("RtpSender not created by this PeerConnection")]
    ErrSenderNotCreatedByConnection,
    #[error("no certificate")]
    ErrNonCertificate,

    // Recorder
    #[error("recorder is closed")]
    ErrRecorderClosed,
    #[error("track kind has no recorder depacketizer")]
    ErrUnsupportedRecorderCodec,

    #[error("parse int: {0}")]
    ParseInt(#[from] ParseIntError),
    #[error("parse addr: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("io error: {0}")]
    Io(String),
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
