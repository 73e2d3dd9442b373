//! The SCSI/MMC-6 sense-code catalogue, and the fixed-format sense
//! descriptor the dispatcher emits for every condition a command raises.

use std::collections::VecDeque;

use mmc_errors::MMCError;
use thiserror::Error;

/// Fixed-format sense data, current errors (SPC-4 §4.5.3), response code 0x70.
pub const RESPONSE_CODE_CURRENT: u8 = 0x70;

/// Additional sense length for our fixed 18-byte descriptor (bytes 8..=17).
const ADDITIONAL_SENSE_LENGTH: u8 = 10;

#[derive(Error, Debug)]
pub enum MMCError {
    #[error(transparent)]
    UnitAttentionCondition(#[from] UnitAttentionCondition),
    #[error(transparent)]
    CDBOrParameterValidationError(#[from] CDBOrParameterValidationError),
    #[error(transparent)]
    ReadinessError(#[from] ReadinessError),
    #[error(transparent)]
    ProtocolError(#[from] ProtocolError),
    #[error(transparent)]
    GeneralMediaAccessError(#[from] GeneralMediaAccessError),
    #[error(transparent)]
    ReadingError(#[from] ReadingError),
    #[error(transparent)]
    WritingError(#[from] WritingError),
    #[error(transparent)]
    HardwareFailure(#[from] HardwareFailure),
    #[error(transparent)]
    NonATAPIEnvironmentError(#[from] NonATAPIEnvironmentError),
}

impl MMCError {
    pub fn from_codes(sk: u8, asc: u8, ascq: u8) -> Option<Self> {
        UnitAttentionCondition::from_codes(sk, asc, ascq)
            .map(Self::UnitAttentionCondition)
            .or_else(|| {
                CDBOrParameterValidationError::from_codes(sk, asc, ascq)
                    .map(Self::CDBOrParameterValidationError)
            })
            .or_else(|| ReadinessError::from_codes(sk, asc, ascq).map(Self::ReadinessError))
            .or_else(|| ProtocolError::from_codes(sk, asc, ascq).map(Self::ProtocolError))
            .or_else(|| {
                GeneralMediaAccessError::from_codes(sk, asc, ascq)
                    .map(Self::GeneralMediaAccessError)
            })
            .or_else(|| ReadingError::from_codes(sk, asc, ascq).map(Self::ReadingError))
            .or_else(|| WritingError::from_codes(sk, asc, ascq).map(Self::WritingError))
            .or_else(|| HardwareFailure::from_codes(sk, asc, ascq).map(Self::HardwareFailure))
            .or_else(|| {
                NonATAPIEnvironmentError::from_codes(sk, asc, ascq)
                    .map(Self::NonATAPIEnvironmentError)
            })
    }

    pub fn to_sense(&self) -> (u8, u8, u8) {
        match self {
            Self::UnitAttentionCondition(e) => e.to_sense(),
            Self::CDBOrParameterValidationError(e) => e.to_sense(),
            Self::ReadinessError(e) => e.to_sense(),
            Self::ProtocolError(e) => e.to_sense(),
            Self::GeneralMediaAccessError(e) => e.to_sense(),
            Self::ReadingError(e) => e.to_sense(),
            Self::WritingError(e) => e.to_sense(),
            Self::HardwareFailure(e) => e.to_sense(),
            Self::NonATAPIEnvironmentError(e) => e.to_sense(),
        }
    }

    /// Build the fixed-format (18-byte) sense descriptor this condition maps to.
    pub fn to_sense_descriptor(&self) -> [u8; 18] {
        let (sk, asc, ascq) = self.to_sense();
        build_fixed_sense(sk, asc, ascq)
    }
}

/// Assemble a fixed-format sense descriptor (SPC-4 §4.5.3) for a raw triple.
pub fn build_fixed_sense(sense_key: u8, asc: u8, ascq: u8) -> [u8; 18] {
    let mut buf = [0u8; 18];
    buf[0] = RESPONSE_CODE_CURRENT;
    buf[2] = sense_key & 0x0F;
    buf[7] = ADDITIONAL_SENSE_LENGTH;
    buf[12] = asc;
    buf[13] = ascq;
    buf
}

/// Per-drive queue of pending Unit Attention conditions.
///
/// MMC-6 requires a drive to report each queued UA exactly once, oldest
/// first, clearing it from the queue on report (unless REQUEST SENSE's
/// descriptor format or persistent-reservations rules say otherwise, which
/// this stack does not implement).
#[derive(Debug, Default)]
pub struct UnitAttentionQueue {
    pending: VecDeque<UnitAttentionCondition>,
}

impl UnitAttentionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: UnitAttentionCondition) {
        self.pending.push_back(condition);
    }

    pub fn pop(&mut self) -> Option<UnitAttentionCondition> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAttentionCondition {
    #[error("NOT READY TO READY CHANGE, MEDIUM MAY HAVE CHANGED")]
    #[mmc_error(sk = 0x6, asc = 0x28, ascq = 0x00)]
    NotReadyToReadyChangeMediumMayHaveChanged,
    #[error("IMPORT OR EXPORT ELEMENT ACCESSED")]
    #[mmc_error(sk = 0x6, asc = 0x28, ascq = 0x01)]
    ImportOrExportElementAccessed,
    #[error("FORMAT-LAYER MAY HAVE CHANGED")]
    #[mmc_error(sk = 0x6, asc = 0x28, ascq = 0x02)]
    FormatLayerMayHaveChanged,
    #[error("POWER ON, RESET, OR BUS DEVICE RESET OCCURRED")]
    #[mmc_error(sk = 0x6, asc = 0x29, ascq = 0x00)]
    PowerOnResetOrBusDeviceResetOccured,
    #[error("POWER ON OCCURRED")]
    #[mmc_error(sk = 0x6, asc = 0x29, ascq = 0x01)]
    PowerOnOccured,
    #[error("PARAMETERS CHANGED")]
    #[mmc_error(sk = 0x6, asc = 0x2A, ascq = 0x00)]
    ParametersChanged,
    #[error("MEDIUM DESTINATION ELEMENT FULL")]
    #[mmc_error(sk = 0x6, asc = 0x3B, ascq = 0x0D)]
    MediumDestinationElementFull,
    #[error("MEDIUM MAGAZINE REMOVED")]
    #[mmc_error(sk = 0x6, asc = 0x3B, ascq = 0x12)]
    MediumMagazineRemoved,
    #[error("MEDIUM MAGAZINE INSERTED")]
    #[mmc_error(sk = 0x6, asc = 0x3B, ascq = 0x13)]
    MediumMagazineInserted,
    #[error("TARGET OPERATING CONDITIONS HAVE CHANGED")]
    #[mmc_error(sk = 0x6, asc = 0x3F, ascq = 0x00)]
    TargetOperatingConditionsHaveChanged,
    #[error("INQUIRY DATA HAS CHANGED")]
    #[mmc_error(sk = 0x6, asc = 0x3F, ascq = 0x03)]
    InquiryDataHasChanged,
    #[error("OPERATOR REQUEST OR STATE CHANGE INPUT")]
    #[mmc_error(sk = 0x6, asc = 0x5A, ascq = 0x00)]
    OperatorRequestOrStateChangeInput,
    #[error("OPERATOR MEDIUM REMOVAL REQUEST")]
    #[mmc_error(sk = 0x6, asc = 0x5A, ascq = 0x01)]
    OperatorMediumRemovalRequest,
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CDBOrParameterValidationError {
    #[error("PARAMETER LIST LENGTH ERROR")]
    #[mmc_error(sk = 0x5, asc = 0x1A, ascq = 0x00)]
    ParameterListLengthError,
    #[error("INVALID COMMAND OPERATION CODE")]
    #[mmc_error(sk = 0x5, asc = 0x20, ascq = 0x00)]
    InvalidCommandOperationCode,
    #[error("LOGICAL BLOCK ADDRESS OUT OF RANGE")]
    #[mmc_error(sk = 0x5, asc = 0x21, ascq = 0x00)]
    LogicalBlockAddressOutOfRange,
    #[error("INVALID FUNCTION")]
    #[mmc_error(sk = 0x5, asc = 0x22, ascq = 0x00)]
    InvalidFunction,
    #[error("INVALID FIELD IN CDB")]
    #[mmc_error(sk = 0x5, asc = 0x24, ascq = 0x00)]
    InvalidFieldInCdb,
    #[error("INVALID FIELD IN PARAMETER LIST")]
    #[mmc_error(sk = 0x5, asc = 0x26, ascq = 0x00)]
    InvalidFieldInParameterList,
    #[error("PARAMETER NOT SUPPORTED")]
    #[mmc_error(sk = 0x5, asc = 0x26, ascq = 0x01)]
    ParameterNotSupported,
    #[error("PARAMETER VALUE INVALID")]
    #[mmc_error(sk = 0x5, asc = 0x26, ascq = 0x02)]
    ParameterValueInvalid,
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("LOGICAL UNIT NOT READY, CAUSE NOT REPORTABLE")]
    #[mmc_error(sk = 0x2, asc = 0x04, ascq = 0x00)]
    LogicalUnitNotReadyCauseNotReportable,
    #[error("LOGICAL UNIT IS IN PROCESS OF BECOMING READY")]
    #[mmc_error(sk = 0x2, asc = 0x04, ascq = 0x01)]
    LogicalUnitIsInProcessOfBecomingReady,
    #[error("LOGICAL UNIT NOT READY, INITIALIZING CMD. REQUIRED")]
    #[mmc_error(sk = 0x2, asc = 0x04, ascq = 0x02)]
    LogicalUnitNotReadyInitializingCmdRequired,
    #[error("INCOMPATIBLE MEDIUM INSTALLED")]
    #[mmc_error(sk = 0x2, asc = 0x30, ascq = 0x00)]
    IncompatibleMediumInstalled,
    #[error("CANNOT READ MEDIUM – UNKNOWN FORMAT")]
    #[mmc_error(sk = 0x2, asc = 0x30, ascq = 0x01)]
    CannotReadMediumUnknownFormat,
    #[error("CANNOT READ MEDIUM – INCOMPATIBLE FORMAT")]
    #[mmc_error(sk = 0x2 | 0x5, asc = 0x30, ascq = 0x02)]
    CannotReadMediumIncompatibleFormat,
    #[error("MEDIUM NOT PRESENT")]
    #[mmc_error(sk = 0x2, asc = 0x3A, ascq = 0x00)]
    MediumNotPresent,
    #[error("MEDIUM NOT PRESENT – TRAY CLOSED")]
    #[mmc_error(sk = 0x2, asc = 0x3A, ascq = 0x01)]
    MediumNotPresentTrayClosed,
    #[error("MEDIUM NOT PRESENT – TRAY OPEN")]
    #[mmc_error(sk = 0x2, asc = 0x3A, ascq = 0x02)]
    MediumNotPresentTrayOpen,
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("COMMAND SEQUENCE ERROR")]
    #[mmc_error(sk = 0x5, asc = 0x2C, ascq = 0x00)]
    CommandSequenceError,
    #[error("CURRENT PROGRAM AREA IS NOT EMPTY")]
    #[mmc_error(sk = 0x5, asc = 0x2C, ascq = 0x03)]
    CurrentProgramAreaIsNotEmpty,
    #[error("CURRENT PROGRAM AREA IS EMPTY")]
    #[mmc_error(sk = 0x5, asc = 0x2C, ascq = 0x04)]
    CurrentProgramAreaIsEmpty,
    #[error("MEDIUM NOT FORMATTED")]
    #[mmc_error(sk = 0x5, asc = 0x30, ascq = 0x10)]
    MediumNotFormatted,
    #[error("MEDIUM REMOVAL PREVENTED")]
    #[mmc_error(sk = 0x5, asc = 0x53, ascq = 0x02)]
    MediumRemovalPrevented,
    #[error("ILLEGAL MODE FOR THIS TRACK")]
    #[mmc_error(sk = 0x5, asc = 0x64, ascq = 0x00)]
    IllegalModeForThisTrack,
    #[error("READ OF SCRAMBLED SECTOR WITHOUT AUTHENTICATION")]
    #[mmc_error(sk = 0x5, asc = 0x6F, ascq = 0x03)]
    ReadOfScrambledSectorWithoutAuthentication,
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralMediaAccessError {
    #[error("NO REFERENCE POSITION FOUND")]
    #[mmc_error(sk = 0x3, asc = 0x06, ascq = 0x00)]
    NoReferencePositionFound,
    #[error("RANDOM POSITIONING ERROR")]
    #[mmc_error(sk = 0x3, asc = 0x15, ascq = 0x00)]
    RandomPositioningError,
    #[error("MEDIUM FORMAT CORRUPTED")]
    #[mmc_error(sk = 0x3, asc = 0x31, ascq = 0x00)]
    MediumFormatCorrupted,
    #[error("UNABLE TO RECOVER TABLE-OF-CONTENTS")]
    #[mmc_error(sk = 0x3, asc = 0x57, ascq = 0x00)]
    UnableToRecoverTableOfContents,
    #[error("CD CONTROL ERROR")]
    #[mmc_error(sk = 0x3, asc = 0x73, ascq = 0x00)]
    CdControlError,
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingError {
    #[error("UNRECOVERED READ ERROR")]
    #[mmc_error(sk = 0x3, asc = 0x11, ascq = 0x00)]
    UnrecoveredReadError,
    #[error("ERROR TOO LONG TO CORRECT")]
    #[mmc_error(sk = 0x3, asc = 0x11, ascq = 0x02)]
    ErrorTooLongToCorrect,
    #[error("L-EC UNCORRECTABLE ERROR")]
    #[mmc_error(sk = 0x3, asc = 0x11, ascq = 0x05)]
    LECUncorrectableError,
    #[error("READ ERROR – LOSS OF STREAMING")]
    #[mmc_error(sk = 0xB, asc = 0x11, ascq = 0x11)]
    ReadErrorLossOfStreaming,
    #[error("RECOVERED DATA WITH ERROR CORRECTION APPLIED")]
    #[mmc_error(sk = 0x1, asc = 0x18, ascq = 0x00)]
    RecoveredDataWithErrorCorrectionApplied,
    #[error("BLANK CHECK")]
    #[mmc_error(sk = 0x8, asc = _, ascq = _)]
    BlankCheck,
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritingError {
    #[error("WRITE ERROR")]
    #[mmc_error(sk = 0x3, asc = 0x0C, ascq = 0x00)]
    WriteError,
    #[error("WRITE PROTECTED")]
    #[mmc_error(sk = 0x7, asc = 0x27, ascq = 0x00)]
    WriteProtected,
    #[error("HARDWARE WRITE PROTECTED")]
    #[mmc_error(sk = 0x7, asc = 0x27, ascq = 0x01)]
    HardwareWriteProtected,
    #[error("NO DEFECT SPARE LOCATION AVAILABLE")]
    #[mmc_error(sk = 0x3, asc = 0x32, ascq = 0x00)]
    NoDefectSpareLocationAvailable,
    #[error("SESSION FIXATION ERROR")]
    #[mmc_error(sk = 0x3, asc = 0x72, ascq = 0x00)]
    SessionFixationError,
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareFailure {
    #[error("LOGICAL UNIT COMMUNICATION FAILURE")]
    #[mmc_error(sk = 0x4, asc = 0x08, ascq = 0x00)]
    LogicalUnitCommunicationFailure,
    #[error("LOGICAL UNIT COMMUNICATION TIMEOUT")]
    #[mmc_error(sk = 0x4, asc = 0x08, ascq = 0x01)]
    LogicalUnitCommunicationTimeout,
    #[error("DIAGNOSTIC FAILURE ON COMPONENT NN (80H-FFH)")]
    #[mmc_error(sk = 0x4, asc = 0x40, ascq = 0x80..=0xFF)]
    DiagnosticFailureOnComponentNN,
    #[error("INTERNAL TARGET FAILURE")]
    #[mmc_error(sk = 0x4, asc = 0x44, ascq = 0x00)]
    InternalTargetFailure,
    #[error("COMMAND PHASE ERROR")]
    #[mmc_error(sk = 0x4, asc = 0x4A, ascq = 0x00)]
    CommandPhaseError,
    #[error("DATA PHASE ERROR")]
    #[mmc_error(sk = 0x4, asc = 0x4B, ascq = 0x00)]
    DataPhaseError,
    #[error("MEDIA LOAD OR EJECT FAILED")]
    #[mmc_error(sk = 0x4, asc = 0x53, ascq = 0x00)]
    MediaLoadOrEjectFailed,
}

#[derive(Error, MMCError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonATAPIEnvironmentError {
    #[error("LOGICAL UNIT NOT SUPPORTED")]
    #[mmc_error(sk = 0x5, asc = 0x25, ascq = 0x00)]
    LogicalUnitNotSupported,
    /// Raised when the dispatcher receives a new command on a nexus that
    /// still has an outstanding data-phase command — the VHBA wire protocol
    /// assumes one outstanding command per nexus, so this only fires if that
    /// rule is violated.
    #[error("COPY CANNOT EXECUTE SINCE INITIATOR CANNOT DISCONNECT")]
    #[mmc_error(sk = 0x5, asc = 0x2B, ascq = 0x00)]
    CopyCannotExecuteSinceInitiatorCannotDisconnect,
    #[error("COMMANDS CLEARED BY ANOTHER INITIATOR")]
    #[mmc_error(sk = 0x6, asc = 0x2F, ascq = 0x00)]
    CommandsClearedByAnotherInitiator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_codes() {
        let err = ReadinessError::MediumNotPresent;
        let (sk, asc, ascq) = err.to_sense();
        assert_eq!(ReadinessError::from_codes(sk, asc, ascq), Some(err));
    }

    #[test]
    fn wildcard_variant_encodes_first_concrete_byte() {
        assert_eq!(ReadingError::BlankCheck.to_sense(), (0x8, 0, 0));
    }

    #[test]
    fn fixed_sense_descriptor_has_expected_shape() {
        let buf = build_fixed_sense(0x5, 0x24, 0x00);
        assert_eq!(buf[0], RESPONSE_CODE_CURRENT);
        assert_eq!(buf[2], 0x5);
        assert_eq!(buf[7], ADDITIONAL_SENSE_LENGTH);
        assert_eq!(buf[12], 0x24);
        assert_eq!(buf[13], 0x00);
    }

    #[test]
    fn ua_queue_is_fifo() {
        let mut q = UnitAttentionQueue::new();
        q.push(UnitAttentionCondition::PowerOnOccured);
        q.push(UnitAttentionCondition::MediumMagazineInserted);
        assert_eq!(q.pop(), Some(UnitAttentionCondition::PowerOnOccured));
        assert_eq!(q.pop(), Some(UnitAttentionCondition::MediumMagazineInserted));
        assert!(q.is_empty());
    }
}
