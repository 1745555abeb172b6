//! Element and attribute names of the KeePass 2 XML body

pub const KEEPASS_FILE: &str = "KeePassFile";
pub const META: &str = "Meta";
pub const ROOT: &str = "Root";
pub const GROUP: &str = "Group";
pub const ENTRY: &str = "Entry";

pub const GENERATOR: &str = "Generator";
pub const HEADER_HASH: &str = "HeaderHash";
pub const DATABASE_NAME: &str = "DatabaseName";
pub const DATABASE_NAME_CHANGED: &str = "DatabaseNameChanged";
pub const DATABASE_DESCRIPTION: &str = "DatabaseDescription";
pub const DATABASE_DESCRIPTION_CHANGED: &str = "DatabaseDescriptionChanged";
pub const DEFAULT_USERNAME: &str = "DefaultUserName";
pub const DEFAULT_USERNAME_CHANGED: &str = "DefaultUserNameChanged";
pub const MAINTENANCE_HISTORY_DAYS: &str = "MaintenanceHistoryDays";
pub const COLOR: &str = "Color";
pub const MASTER_KEY_CHANGED: &str = "MasterKeyChanged";
pub const MASTER_KEY_CHANGE_REC: &str = "MasterKeyChangeRec";
pub const MASTER_KEY_CHANGE_FORCE: &str = "MasterKeyChangeForce";
pub const MEMORY_PROTECTION: &str = "MemoryProtection";
pub const PROTECT_TITLE: &str = "ProtectTitle";
pub const PROTECT_USERNAME: &str = "ProtectUserName";
pub const PROTECT_PASSWORD: &str = "ProtectPassword";
pub const PROTECT_URL: &str = "ProtectURL";
pub const PROTECT_NOTES: &str = "ProtectNotes";
pub const CUSTOM_ICONS: &str = "CustomIcons";
pub const ICON: &str = "Icon";
pub const RECYCLE_BIN_ENABLED: &str = "RecycleBinEnabled";
pub const RECYCLE_BIN_UUID: &str = "RecycleBinUUID";
pub const RECYCLE_BIN_CHANGED: &str = "RecycleBinChanged";
pub const ENTRY_TEMPLATES_GROUP: &str = "EntryTemplatesGroup";
pub const ENTRY_TEMPLATES_GROUP_CHANGED: &str = "EntryTemplatesGroupChanged";
pub const HISTORY_MAX_ITEMS: &str = "HistoryMaxItems";
pub const HISTORY_MAX_SIZE: &str = "HistoryMaxSize";
pub const LAST_SELECTED_GROUP: &str = "LastSelectedGroup";
pub const LAST_TOP_VISIBLE_GROUP: &str = "LastTopVisibleGroup";
pub const BINARIES: &str = "Binaries";
pub const BINARY: &str = "Binary";
pub const CUSTOM_DATA: &str = "CustomData";
pub const ITEM: &str = "Item";

pub const UUID: &str = "UUID";
pub const NAME: &str = "Name";
pub const NOTES: &str = "Notes";
pub const DATA: &str = "Data";
pub const KEY: &str = "Key";
pub const VALUE: &str = "Value";
pub const ICON_ID: &str = "IconID";
pub const CUSTOM_ICON_UUID: &str = "CustomIconUUID";
pub const IS_EXPANDED: &str = "IsExpanded";
pub const DEFAULT_AUTO_TYPE_SEQUENCE: &str = "DefaultAutoTypeSequence";
pub const ENABLE_AUTO_TYPE: &str = "EnableAutoType";
pub const ENABLE_SEARCHING: &str = "EnableSearching";
pub const LAST_TOP_VISIBLE_ENTRY: &str = "LastTopVisibleEntry";
pub const TAGS: &str = "Tags";
pub const PREVIOUS_PARENT_GROUP: &str = "PreviousParentGroup";

pub const FOREGROUND_COLOR: &str = "ForegroundColor";
pub const BACKGROUND_COLOR: &str = "BackgroundColor";
pub const OVERRIDE_URL: &str = "OverrideURL";
pub const QUALITY_CHECK: &str = "QualityCheck";
pub const STRING: &str = "String";
pub const AUTO_TYPE: &str = "AutoType";
pub const ENABLED: &str = "Enabled";
pub const OBFUSCATION: &str = "DataTransferObfuscation";
pub const DEFAULT_SEQUENCE: &str = "DefaultSequence";
pub const ASSOCIATION: &str = "Association";
pub const WINDOW: &str = "Window";
pub const KEYSTROKE_SEQUENCE: &str = "KeystrokeSequence";
pub const HISTORY: &str = "History";

pub const TIMES: &str = "Times";
pub const CREATION_TIME: &str = "CreationTime";
pub const LAST_MODIFICATION_TIME: &str = "LastModificationTime";
pub const LAST_ACCESS_TIME: &str = "LastAccessTime";
pub const EXPIRY_TIME: &str = "ExpiryTime";
pub const EXPIRES: &str = "Expires";
pub const USAGE_COUNT: &str = "UsageCount";
pub const LOCATION_CHANGED: &str = "LocationChanged";

pub const DELETED_OBJECTS: &str = "DeletedObjects";
pub const DELETED_OBJECT: &str = "DeletedObject";
pub const DELETION_TIME: &str = "DeletionTime";

pub const ATTR_PROTECTED: &str = "Protected";
pub const ATTR_REF: &str = "Ref";
pub const ATTR_ID: &str = "ID";
pub const ATTR_COMPRESSED: &str = "Compressed";

pub const TRUE: &str = "True";
pub const FALSE: &str = "False";
pub const NULL: &str = "null";
